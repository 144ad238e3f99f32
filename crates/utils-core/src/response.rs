use serde::{Deserialize, Serialize};

/// JSON envelope returned by every `/api` handler.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T, E = T> {
    success: bool,
    data: Option<T>,
    error_data: Option<E>,
    message: Option<String>,
}

impl<T, E> ApiResponse<T, E> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error_data: None,
            message: None,
        }
    }

    /// Success with a human-readable summary, e.g. "Image already exists in library".
    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error_data: None,
            message: Some(message.into()),
        }
    }

    pub fn error(message: &str) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error_data: None,
            message: Some(message.to_string()),
        }
    }

    pub fn error_with_data(data: E) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error_data: Some(data),
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_has_no_data() {
        let value = serde_json::to_value(ApiResponse::<()>::error("nope")).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["message"], "nope");
        assert!(value["data"].is_null());
    }

    #[test]
    fn success_with_message_keeps_both() {
        let response = ApiResponse::<u32>::success_with_message(7, "done");
        assert!(response.is_success());
        assert_eq!(response.message(), Some("done"));
        assert_eq!(response.into_data(), Some(7));
    }
}
