use std::fmt;

/// Common error/result aliases used across the crate.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a failed management-plane call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    Auth,
    Forbidden,
    NotFound,
    Conflict,
    RateLimit,
    BadRequest,
    ServerError,
    Network,
    Parse,
    Config,
}

impl fmt::Display for CloudErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Auth => "authentication error",
            Self::Forbidden => "forbidden",
            Self::NotFound => "resource not found",
            Self::Conflict => "resource conflict",
            Self::RateLimit => "rate limit exceeded",
            Self::BadRequest => "bad request",
            Self::ServerError => "server error",
            Self::Network => "network error",
            Self::Parse => "parse error",
            Self::Config => "configuration error",
        };
        f.write_str(label)
    }
}

/// Transport/API fault raised by the cloud client. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub message: String,
    pub status_code: Option<u16>,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), status_code: None }
    }

    /// Classify a non-success HTTP response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 => CloudErrorKind::BadRequest,
            401 => CloudErrorKind::Auth,
            403 => CloudErrorKind::Forbidden,
            404 => CloudErrorKind::NotFound,
            409 => CloudErrorKind::Conflict,
            429 => CloudErrorKind::RateLimit,
            500..=599 => CloudErrorKind::ServerError,
            _ => CloudErrorKind::Network,
        };
        Self { kind, message: arm_error_message(body), status_code: Some(status) }
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "[{} {}] {}", self.kind, code, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for CloudError {}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

// ARM wraps failures as {"error":{"code":..,"message":..}}; fall back to the raw body.
fn arm_error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let inner = parsed.as_ref().and_then(|v| v.get("error"));
    match inner {
        Some(err) => {
            let code = err.get("code").and_then(|c| c.as_str()).unwrap_or("Unknown");
            let message = err.get("message").and_then(|m| m.as_str()).unwrap_or("");
            format!("{code}: {message}")
        }
        None if body.trim().is_empty() => "(empty response body)".to_string(),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(CloudError::from_status(401, "").kind, CloudErrorKind::Auth);
        assert_eq!(CloudError::from_status(403, "").kind, CloudErrorKind::Forbidden);
        assert_eq!(CloudError::from_status(429, "").kind, CloudErrorKind::RateLimit);
        assert_eq!(CloudError::from_status(503, "").kind, CloudErrorKind::ServerError);
        assert_eq!(CloudError::from_status(418, "").kind, CloudErrorKind::Network);
    }

    #[test]
    fn arm_error_body_is_unwrapped() {
        let body = r#"{"error":{"code":"AuthorizationFailed","message":"no access"}}"#;
        let err = CloudError::from_status(403, body);
        assert_eq!(err.message, "AuthorizationFailed: no access");
        assert_eq!(err.status_code, Some(403));
        assert_eq!(err.to_string(), "[forbidden 403] AuthorizationFailed: no access");
    }

    #[test]
    fn plain_body_kept() {
        let err = CloudError::from_status(502, "  bad gateway \n");
        assert_eq!(err.message, "bad gateway");
        let empty = CloudError::from_status(500, "");
        assert_eq!(empty.message, "(empty response body)");
    }

    #[test]
    fn boxes_into_crate_error() {
        let boxed: Error = CloudError::new(CloudErrorKind::Config, "missing subscription").into();
        assert_eq!(boxed.to_string(), "[configuration error] missing subscription");
    }
}
