use thiserror::Error;

use super::result_code::ResultCode;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AsyncMetaError {
    #[error("Target connection is down: {0}")]
    ServerDown(String),

    #[error("Connect to target failed: {0}")]
    Connect(String),

    #[error("Target quarantined: {0}")]
    Quarantined(String),

    #[error("Bind to target rejected ({code}): {text}")]
    BindRejected { code: ResultCode, text: String },

    #[error("DN rewrite refused: {0}")]
    RewriteRefused(String),

    #[error("Control construction failed: {0}")]
    Controls(String),

    #[error("Unknown target index {0}")]
    UnknownTarget(usize),

    #[error("Protocol error from target: {0}")]
    Protocol(String),

    #[error("Invalid DN: {0}")]
    InvalidDn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Maximum pending ops limit exceeded")]
    Busy,

    #[error("Cross-target rename not supported")]
    CrossTargetRename,

    #[error("IO error: {0}")]
    Io(String),
}

impl AsyncMetaError {
    /// Whether a fresh session may succeed where this attempt failed.
    ///
    /// Only transport-level failures qualify: a dropped connection or a
    /// connect that never completed. Everything else is a property of the
    /// request or the configuration and would fail again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AsyncMetaError::ServerDown(_) | AsyncMetaError::Connect(_) | AsyncMetaError::Io(_)
        )
    }

    /// The LDAP result code reported to the client for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            AsyncMetaError::ServerDown(_)
            | AsyncMetaError::Connect(_)
            | AsyncMetaError::Quarantined(_)
            | AsyncMetaError::Io(_) => ResultCode::Unavailable,
            AsyncMetaError::BindRejected { code, .. } => *code,
            AsyncMetaError::RewriteRefused(_) | AsyncMetaError::CrossTargetRename => {
                ResultCode::UnwillingToPerform
            }
            AsyncMetaError::Controls(_)
            | AsyncMetaError::UnknownTarget(_)
            | AsyncMetaError::InvalidConfig(_) => ResultCode::Other,
            AsyncMetaError::Protocol(_) => ResultCode::ProtocolError,
            AsyncMetaError::InvalidDn(_) => ResultCode::InvalidDnSyntax,
            AsyncMetaError::Busy => ResultCode::Busy,
        }
    }
}

impl From<std::io::Error> for AsyncMetaError {
    fn from(err: std::io::Error) -> Self {
        AsyncMetaError::Io(err.to_string())
    }
}

impl From<regex::Error> for AsyncMetaError {
    fn from(err: regex::Error) -> Self {
        AsyncMetaError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AsyncMetaError>;
