//! Platform login client.
//!
//! Exchanges a user name and password for a bearer token. The issued
//! credential expires `validity - skew` after it was issued so the session
//! never presents a token at the very edge of its lifetime.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rio_store::Credential;
use serde::{Deserialize, Serialize};

use crate::config::SessionSettings;
use crate::error::{AuthError, Result};
use crate::transport::{HttpRequest, HttpTransport, Method};

/// Request payload for the login endpoint.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// User name (email).
    pub user_name: String,
    /// Password.
    pub password: String,
    /// Requested token lifetime in seconds.
    pub validity: u64,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .field("validity", &self.validity)
            .finish()
    }
}

#[derive(Deserialize)]
struct RawLoginResponse {
    data: RawLoginData,
}

#[derive(Deserialize)]
struct RawLoginData {
    token: String,
}

/// Client for the platform login endpoint.
#[derive(Clone)]
pub struct LoginClient {
    transport: Arc<dyn HttpTransport>,
    login_url: String,
    validity: Duration,
    skew: Duration,
}

impl LoginClient {
    /// Create a login client sending through `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, settings: &SessionSettings) -> Self {
        Self {
            transport,
            login_url: settings.login_url.clone(),
            validity: settings.token_validity,
            skew: settings.expiry_skew,
        }
    }

    /// Log in and return a fresh credential.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The credentials are rejected (`Authentication`, on 401 or 403)
    /// - The endpoint answers with any other failure status (`RemoteApi`)
    /// - The response does not carry a token (`InvalidResponse`)
    /// - No response is received (`Transport`)
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let payload = LoginRequest {
            user_name: username.to_string(),
            password: password.to_string(),
            validity: self.validity.as_secs(),
        };
        let body = serde_json::to_value(&payload)
            .map_err(|e| AuthError::InvalidResponse(format!("cannot encode login: {e}")))?;

        let request = HttpRequest::new(Method::POST, &self.login_url)
            .header("accept", "application/json")
            .header("Content-Type", "application/json")
            .json(body);

        tracing::debug!(user = %username, url = %self.login_url, "Logging in");

        let response = self.transport.send(request).await?;

        match response.status {
            401 | 403 => {
                tracing::warn!(user = %username, status = response.status, "Login rejected");
                Err(AuthError::Authentication(response.error_message()))
            }
            _ if !response.is_success() => Err(AuthError::RemoteApi {
                status: response.status,
                message: response.error_message(),
            }),
            _ => {
                let raw: RawLoginResponse = serde_json::from_str(&response.body)
                    .map_err(|e| AuthError::InvalidResponse(format!("login response: {e}")))?;

                let issued_at = Utc::now();
                let lifetime = self.validity.saturating_sub(self.skew);
                let lifetime = chrono::Duration::from_std(lifetime)
                    .unwrap_or_else(|_| chrono::Duration::seconds(0));

                tracing::info!(user = %username, "Login succeeded");

                Ok(Credential {
                    token: raw.data.token,
                    issued_at,
                    expires_at: issued_at + lifetime,
                })
            }
        }
    }
}

impl fmt::Debug for LoginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginClient")
            .field("login_url", &self.login_url)
            .field("validity", &self.validity)
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    const LOGIN: &str = "https://auth.test/user/login";

    fn settings() -> SessionSettings {
        SessionSettings {
            login_url: LOGIN.to_string(),
            token_validity: Duration::from_secs(3600),
            expiry_skew: Duration::from_secs(60),
        }
    }

    #[test]
    fn login_request_serializes() {
        let req = LoginRequest {
            user_name: "ops@example.com".to_string(),
            password: "secret".to_string(),
            validity: 86_400,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            json!({"userName": "ops@example.com", "password": "secret", "validity": 86_400})
        );
        assert!(!format!("{req:?}").contains("secret"));
    }

    #[tokio::test]
    async fn login_returns_credential_with_skewed_expiry() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_json(Method::POST, LOGIN, 200, &json!({"data": {"token": "tok-1"}}));

        let client = LoginClient::new(mock.clone(), &settings());
        let credential = client.login("ops@example.com", "secret").await.unwrap();

        assert_eq!(credential.token, "tok-1");
        assert_eq!(
            credential.expires_at - credential.issued_at,
            chrono::Duration::seconds(3540)
        );

        let sent = &mock.requests()[0];
        assert_eq!(
            sent.body,
            Some(json!({"userName": "ops@example.com", "password": "secret", "validity": 3600}))
        );
    }

    #[tokio::test]
    async fn rejected_login_is_authentication_error() {
        for status in [401, 403] {
            let mock = Arc::new(MockTransport::new());
            mock.respond(Method::POST, LOGIN, status, r#"{"error":"bad credentials"}"#);

            let client = LoginClient::new(mock, &settings());
            let err = client.login("ops@example.com", "wrong").await.unwrap_err();
            assert!(matches!(err, AuthError::Authentication(ref m) if m == "bad credentials"));
        }
    }

    #[tokio::test]
    async fn server_failure_is_remote_api_error() {
        let mock = Arc::new(MockTransport::new());
        mock.respond(Method::POST, LOGIN, 503, "");

        let client = LoginClient::new(mock, &settings());
        let err = client.login("ops@example.com", "secret").await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn missing_token_is_invalid_response() {
        let mock = Arc::new(MockTransport::new());
        mock.respond_json(Method::POST, LOGIN, 200, &json!({"data": {}}));

        let client = LoginClient::new(mock, &settings());
        let err = client.login("ops@example.com", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }
}
