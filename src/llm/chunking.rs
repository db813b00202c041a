pub const CHUNK_SIZE: usize = 1000;
pub const CHUNK_OVERLAP: usize = 100;

/// Splits text into overlapping chunks of at most `chunk_size` characters.
///
/// A chunk ends at the last newline past its midpoint, else at the last
/// period past its midpoint, else at the hard limit. The next chunk starts
/// `overlap` characters before that end.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let chunk_size = chunk_size.max(1);
    let overlap = overlap.min(chunk_size - 1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() {
            let midpoint = start + chunk_size / 2;
            let window = &chars[start..end];
            let break_at = window
                .iter()
                .rposition(|c| *c == '\n')
                .filter(|i| start + i > midpoint)
                .or_else(|| window.iter().rposition(|c| *c == '.').filter(|i| start + i > midpoint));
            if let Some(i) = break_at {
                end = start + i + 1;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk.trim().to_string());
        }

        if end >= chars.len() {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_text("Payroll controls.", CHUNK_SIZE, CHUNK_OVERLAP), vec!["Payroll controls."]);
        assert!(chunk_text("   ", CHUNK_SIZE, CHUNK_OVERLAP).is_empty());
    }

    #[test]
    fn test_breaks_on_newline_past_midpoint() {
        let text = format!("{}\n{}", "a".repeat(70), "b".repeat(60));
        let chunks = chunk_text(&text, 100, 10);
        assert_eq!(chunks[0], "a".repeat(70));
        assert!(chunks[1].starts_with("aaaaaaaaa"));
        assert!(chunks.last().unwrap().ends_with('b'));
    }

    #[test]
    fn test_ignores_early_breaks_and_overlaps() {
        let text = format!("{}.{}", "a".repeat(10), "b".repeat(200));
        let chunks = chunk_text(&text, 100, 20);
        assert_eq!(chunks[0].chars().count(), 100);
        let second_start: String = chunks[1].chars().take(20).collect();
        let first_tail: String = chunks[0].chars().skip(80).collect();
        assert_eq!(second_start, first_tail);
    }
}
