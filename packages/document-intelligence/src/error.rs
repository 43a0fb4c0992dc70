use thiserror::Error;

pub type Result<T> = std::result::Result<T, DocumentIntelligenceError>;

#[derive(Debug, Error)]
pub enum DocumentIntelligenceError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service rejected the request (e.g. `InvalidRequest` with an
    /// `InvalidImage` inner error).
    #[error("API error ({status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        inner_code: Option<String>,
        message: String,
    },

    /// The analyze operation was accepted but finished in the `failed` state.
    #[error("analyze operation failed: {code}: {message}")]
    OperationFailed {
        code: String,
        inner_code: Option<String>,
        message: String,
    },

    #[error("analyze operation still running after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl DocumentIntelligenceError {
    /// Whether the service reported `code` at the top level or as the inner error.
    pub fn has_code(&self, wanted: &str) -> bool {
        match self {
            Self::Api {
                code, inner_code, ..
            }
            | Self::OperationFailed {
                code, inner_code, ..
            } => code == wanted || inner_code.as_deref() == Some(wanted),
            _ => false,
        }
    }
}
