use reqwest::StatusCode;

use common::fao::FaoError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("invalid auth token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
}

impl ApiError {
    /// Whether the service reported that the subject does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            ApiError::HttpStatus(status, body) => {
                *status == StatusCode::NOT_FOUND || body.contains("subject_does_not_exist")
            }
            _ => false,
        }
    }

    /// The filesystem error this failure means for `subject`.
    pub fn into_fao(self, subject: &str) -> FaoError {
        if self.is_not_found() {
            return FaoError::NotFound(subject.to_string());
        }
        FaoError::Transport(format!("{}: {}", subject, self))
    }
}

impl From<ApiError> for FaoError {
    fn from(e: ApiError) -> Self {
        if e.is_not_found() {
            return FaoError::NotFound(e.to_string());
        }
        FaoError::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let e = ApiError::HttpStatus(StatusCode::NOT_FOUND, String::new());
        assert!(matches!(e.into_fao("/a"), FaoError::NotFound(p) if p == "/a"));

        let e = ApiError::HttpStatus(
            StatusCode::BAD_REQUEST,
            r#"{"code":"subject_does_not_exist"}"#.to_string(),
        );
        assert!(matches!(FaoError::from(e), FaoError::NotFound(_)));
    }

    #[test]
    fn test_other_statuses_are_transport_failures() {
        let e = ApiError::HttpStatus(StatusCode::BAD_GATEWAY, "upstream".to_string());
        match e.into_fao("/a") {
            FaoError::Transport(message) => assert!(message.contains("502")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
