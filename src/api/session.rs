use std::sync::Arc;
use thiserror::Error;

use crate::document::ProcessedDocument;
use crate::rcm::Assessment;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("An analysis is already running")]
    AnalysisRunning,
    #[error("Clear the current analysis before uploading another file")]
    ResultsShown,
    #[error("Upload a file first")]
    NoDocument,
    #[error("No analysis results available")]
    NoAssessment,
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Ready {
        document: Arc<ProcessedDocument>,
    },
    Analyzing {
        document: Arc<ProcessedDocument>,
    },
    Displaying {
        document: Arc<ProcessedDocument>,
        assessment: Arc<Assessment>,
    },
}

/// The single user's workflow: upload, analyze, review, clear.
#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
    last_error: Option<String>,
}

impl Session {
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> &'static str {
        match self.state {
            SessionState::Idle => "idle",
            SessionState::Ready { .. } => "ready",
            SessionState::Analyzing { .. } => "analyzing",
            SessionState::Displaying { .. } => "displaying",
        }
    }

    pub fn document(&self) -> Option<&Arc<ProcessedDocument>> {
        match &self.state {
            SessionState::Idle => None,
            SessionState::Ready { document }
            | SessionState::Analyzing { document }
            | SessionState::Displaying { document, .. } => Some(document),
        }
    }

    pub fn assessment(&self) -> Option<&Arc<Assessment>> {
        match &self.state {
            SessionState::Displaying { assessment, .. } => Some(assessment),
            _ => None,
        }
    }

    /// Checked before parsing, so a rejected upload costs nothing.
    pub fn can_upload(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Analyzing { .. } => Err(SessionError::AnalysisRunning),
            SessionState::Displaying { .. } => Err(SessionError::ResultsShown),
            _ => Ok(()),
        }
    }

    pub fn load(&mut self, document: ProcessedDocument) -> Result<(), SessionError> {
        self.can_upload()?;
        self.state = SessionState::Ready {
            document: Arc::new(document),
        };
        self.last_error = None;
        Ok(())
    }

    pub fn begin_analysis(&mut self) -> Result<Arc<ProcessedDocument>, SessionError> {
        match &self.state {
            SessionState::Ready { document } => {
                let document = document.clone();
                self.state = SessionState::Analyzing {
                    document: document.clone(),
                };
                self.last_error = None;
                Ok(document)
            }
            SessionState::Idle => Err(SessionError::NoDocument),
            SessionState::Analyzing { .. } => Err(SessionError::AnalysisRunning),
            SessionState::Displaying { .. } => Err(SessionError::ResultsShown),
        }
    }

    /// Ends the running analysis. A failure returns to `Ready` with the message kept.
    pub fn finish(&mut self, outcome: Result<Assessment, String>) {
        let SessionState::Analyzing { document } = &self.state else {
            return;
        };
        let document = document.clone();
        self.state = match outcome {
            Ok(assessment) => SessionState::Displaying {
                document,
                assessment: Arc::new(assessment),
            },
            Err(message) => {
                self.last_error = Some(message);
                SessionState::Ready { document }
            }
        };
    }

    pub fn clear(&mut self) -> Result<(), SessionError> {
        if matches!(self.state, SessionState::Analyzing { .. }) {
            return Err(SessionError::AnalysisRunning);
        }
        self.state = SessionState::Idle;
        self.last_error = None;
        Ok(())
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
