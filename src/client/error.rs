use thiserror::Error;

/// Errors that can occur while talking to the Aikido API.
///
/// SECURITY: Error messages must NEVER contain the client secret or access tokens.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The OAuth token request was rejected.
    #[error("authentication failed: {message}")]
    Auth {
        /// Reason reported by the token endpoint.
        message: String,
    },

    /// The API returned a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error description from the response body.
        message: String,
    },

    /// Network-level error (connection failed, timeout, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("failed to decode {context}: {message}")]
    Decode {
        /// What was being decoded.
        context: &'static str,
        /// Decoder error.
        message: String,
    },

    /// The client could not be built from the given settings.
    #[error("invalid client configuration: {message}")]
    InvalidConfig {
        /// What was wrong with the settings.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = ClientError::Auth {
            message: "invalid_client".to_string(),
        };
        assert_eq!(err.to_string(), "authentication failed: invalid_client");
    }

    #[test]
    fn test_api_error_display() {
        let err = ClientError::Api {
            status: 403,
            message: "Forbidden".to_string(),
        };
        assert_eq!(err.to_string(), "API error (403): Forbidden");
    }

    #[test]
    fn test_decode_error_display() {
        let err = ClientError::Decode {
            context: "team list",
            message: "expected a sequence".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to decode team list: expected a sequence"
        );
    }
}
