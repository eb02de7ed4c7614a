/// Error codes the gateway uses when it throttles a client.
const RATE_LIMIT_CODES: &[&str] = &["RATE_LIMIT", "RATE_LIMITED", "TOO_MANY_REQUESTS", "429"];

/// Simplified error system - one enum, no over-engineering.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Transport-level failure: socket refused, request never completed.
    NetworkError(String),
    /// REST endpoint answered with a non-success status.
    HttpStatus(u16),
    /// Payload could not be decoded.
    ParseError(String),
    /// Application error pushed by the gateway (`error {message}`).
    GatewayError { message: String, code: Option<String> },
    /// Chart library or container problem.
    ChartError(String),
    ValidationError(String),
}

impl AppError {
    pub fn gateway(message: impl Into<String>, code: Option<String>) -> Self {
        AppError::GatewayError { message: message.into(), code }
    }

    /// True for gateway errors that must halt reconnect attempts.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            AppError::GatewayError { code: Some(code), .. } => {
                RATE_LIMIT_CODES.iter().any(|c| c.eq_ignore_ascii_case(code))
            }
            AppError::HttpStatus(status) => *status == 429,
            _ => false,
        }
    }

    /// Text shown in the UI error field. Gateway messages are passed through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            AppError::GatewayError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NetworkError(msg) => write!(f, "Network Error: {}", msg),
            AppError::HttpStatus(status) => write!(f, "HTTP Error: status {}", status),
            AppError::ParseError(msg) => write!(f, "Parse Error: {}", msg),
            AppError::GatewayError { message, code: Some(code) } => {
                write!(f, "Gateway Error [{}]: {}", code, message)
            }
            AppError::GatewayError { message, code: None } => write!(f, "Gateway Error: {}", message),
            AppError::ChartError(msg) => write!(f, "Chart Error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

pub type NetworkResult<T> = Result<T, AppError>;
pub type ChartResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detection_matches_codes_case_insensitively() {
        assert!(AppError::gateway("slow down", Some("rate_limit".into())).is_rate_limited());
        assert!(AppError::HttpStatus(429).is_rate_limited());
        assert!(!AppError::gateway("bad symbol", Some("INVALID_SYMBOL".into())).is_rate_limited());
        assert!(!AppError::gateway("no code", None).is_rate_limited());
    }

    #[test]
    fn gateway_message_is_surfaced_verbatim() {
        let err = AppError::gateway("Too many subscriptions", Some("RATE_LIMIT".into()));
        assert_eq!(err.user_message(), "Too many subscriptions");
        assert_eq!(AppError::HttpStatus(500).user_message(), "HTTP Error: status 500");
    }
}
