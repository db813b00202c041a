pub mod gemini;

pub use gemini::{GeminiProvider, RCM_SYSTEM_MESSAGE};
