use serde::{Deserialize, Serialize};

/// Failures raised by a render client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("load failed: {0}")]
    Load(String),
    #[error("session failed: {0}")]
    Session(String),
    #[error("unsupported by this render client: {0}")]
    Unsupported(String),
}

/// Failures the scrape engine distinguishes when deciding how far a problem
/// is allowed to reach.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScrapeError {
    #[error("transient load failure: {0}")]
    TransientLoad(String),
    #[error("malformed markup: {0}")]
    MalformedMarkup(String),
    #[error("unparsable numeral: {0:?}")]
    UnparsableNumeral(String),
    #[error("session failure: {0}")]
    Session(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientLoad,
    MalformedMarkup,
    UnparsableNumeral,
    Session,
}

impl ScrapeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::TransientLoad(_) => FailureKind::TransientLoad,
            Self::MalformedMarkup(_) => FailureKind::MalformedMarkup,
            Self::UnparsableNumeral(_) => FailureKind::UnparsableNumeral,
            Self::Session(_) => FailureKind::Session,
        }
    }

    pub fn is_session(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

impl From<RenderError> for ScrapeError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Timeout(msg) | RenderError::Load(msg) => Self::TransientLoad(msg),
            RenderError::Session(msg) => Self::Session(msg),
            RenderError::Unsupported(msg) => Self::MalformedMarkup(msg),
        }
    }
}
