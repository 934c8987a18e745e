use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeadOptError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote service error ({service}): {message}")]
    RemoteService { service: String, message: String },

    /// 5xx or 429 from a service; retried within the budget.
    #[error("Remote service unavailable ({service}): {message}")]
    RemoteUnavailable { service: String, message: String },

    #[error(
        "Polling exhausted after {attempts} attempts at {url}: expected key(s) {expected_key:?} never appeared. Last response: {last_response}"
    )]
    PollExhausted {
        url: String,
        expected_key: Vec<String>,
        attempts: u32,
        last_response: String,
    },

    #[error("{program} exited with {status}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    Subprocess {
        program: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Security error: {0}")]
    Security(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LeadOptError {
    pub fn remote(service: &str, message: impl Into<String>) -> Self {
        Self::RemoteService {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn unavailable(service: &str, message: impl Into<String>) -> Self {
        Self::RemoteUnavailable {
            service: service.to_string(),
            message: message.into(),
        }
    }

    /// Errors worth another attempt: transport failures and 5xx/429 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status.as_u16() == 429
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
                }
            }
            Self::RemoteUnavailable { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LeadOptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_services_are_transient() {
        assert!(LeadOptError::unavailable("pubchem", "503 Service Unavailable").is_transient());
        assert!(!LeadOptError::remote("pubchem", "No compound found for name `xyz`").is_transient());
        assert!(!LeadOptError::Parse("bad".into()).is_transient());
        assert!(!LeadOptError::Config("bad".into()).is_transient());
    }
}
