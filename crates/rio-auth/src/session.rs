//! Authenticated platform session.
//!
//! A [`Session`] keeps one bearer credential alive across any number of
//! calls. The credential lives in the durable [`Store`] so it survives
//! process restarts; it is reused while unexpired, replaced by a fresh login
//! once it expires, and replaced once more if the platform rejects it early
//! with a 401.
//!
//! The cache is read, checked and possibly rewritten under a single async
//! mutex, so concurrent callers sharing a session never log in twice for the
//! same expiry.

use std::fmt;
use std::sync::Arc;

use rio_core::ProjectId;
use rio_store::{Store, StoreExt};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::client::LoginClient;
use crate::config::{self, ConfigSource, SessionSettings};
use crate::error::{AuthError, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// Per-call overrides of the ambient project and token.
#[derive(Clone, Default)]
pub struct RequestScope {
    /// Project to act in; falls back to configuration.
    pub project_id: Option<ProjectId>,
    /// Bearer token to present; never refreshed by the session.
    pub auth_token: Option<String>,
}

impl RequestScope {
    /// Scope that relies entirely on configuration.
    #[must_use]
    pub fn ambient() -> Self {
        Self::default()
    }

    /// Scope pinned to a project.
    #[must_use]
    pub fn project(project_id: ProjectId) -> Self {
        Self {
            project_id: Some(project_id),
            auth_token: None,
        }
    }

    /// Use an explicit bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("project_id", &self.project_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the bearer token of a call came from.
enum Bearer {
    /// Supplied by the caller or static configuration; never refreshed.
    Explicit(String),
    /// Taken from the credential cache; refreshed once on 401.
    Cached(String),
}

impl Bearer {
    fn token(&self) -> &str {
        match self {
            Self::Explicit(token) | Self::Cached(token) => token,
        }
    }
}

/// An authenticated session against the platform API.
pub struct Session {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn Store>,
    config: Arc<dyn ConfigSource>,
    login: LoginClient,
    cache_lock: Mutex<()>,
}

impl Session {
    /// Create a session.
    #[must_use]
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn Store>,
        config: Arc<dyn ConfigSource>,
        settings: &SessionSettings,
    ) -> Self {
        let login = LoginClient::new(Arc::clone(&transport), settings);
        Self {
            transport,
            store,
            config,
            login,
            cache_lock: Mutex::new(()),
        }
    }

    /// Send an authenticated request and return the parsed JSON body.
    ///
    /// An empty success body is returned as an empty object. If the platform
    /// answers 401 to a cached token, the session logs in once more and
    /// retries the call exactly once.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No project scope or login credentials are configured (`Configuration`)
    /// - Login is rejected (`Authentication`)
    /// - The platform answers with a failure status (`RemoteApi`)
    /// - No response is received (`Transport`)
    /// - The credential cache cannot be used (`Store`)
    pub async fn authenticated_request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
        scope: &RequestScope,
    ) -> Result<Value> {
        let project = self.resolve_project(scope)?;
        let bearer = self.bearer(scope).await?;

        let response = self
            .send(&method, url, body, params, &project, bearer.token())
            .await?;

        if response.status == 401 {
            if let Bearer::Cached(stale) = &bearer {
                tracing::info!(method = %method, url = %url, "Bearer token rejected, logging in again");
                let fresh = self.reissue(stale).await?;
                return self
                    .send(&method, url, body, params, &project, &fresh)
                    .await?
                    .into_document();
            }
        }

        response.into_document()
    }

    /// Fetch a JSON document that needs no authentication.
    ///
    /// # Errors
    ///
    /// Returns `RemoteApi` for failure statuses, `Transport` if no response
    /// is received and `InvalidResponse` if the body is not JSON.
    pub async fn fetch_document(&self, url: &str) -> Result<Value> {
        let request =
            HttpRequest::new(Method::GET, url).header("accept", "application/json");
        self.transport.send(request).await?.into_document()
    }

    /// Resolve the project a call acts in.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if neither the scope nor configuration names a
    /// valid project.
    pub fn resolve_project(&self, scope: &RequestScope) -> Result<ProjectId> {
        if let Some(project) = &scope.project_id {
            return Ok(project.clone());
        }

        let configured = self.config.get(config::PROJECT_ID).ok_or_else(|| {
            AuthError::Configuration(format!("no project id given and {} is not set", config::PROJECT_ID))
        })?;

        ProjectId::new(configured)
            .map_err(|e| AuthError::Configuration(format!("{}: {e}", config::PROJECT_ID)))
    }

    async fn bearer(&self, scope: &RequestScope) -> Result<Bearer> {
        if let Some(token) = scope.auth_token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(Bearer::Explicit(token.clone()));
        }
        if let Some(token) = self.config.get(config::AUTH_TOKEN) {
            return Ok(Bearer::Explicit(token));
        }
        self.cached_token().await.map(Bearer::Cached)
    }

    /// Return the cached token, logging in if it is missing or expired.
    async fn cached_token(&self) -> Result<String> {
        let _guard = self.cache_lock.lock().await;

        if let Some(credential) = self.store.load_credential()? {
            if credential.is_valid() {
                return Ok(credential.token);
            }
            tracing::debug!(expired_at = %credential.expires_at, "Cached credential expired");
        }

        self.login_and_save().await
    }

    /// Replace a token the platform rejected.
    ///
    /// If another caller already replaced it, the newer cached token is used
    /// without logging in again.
    async fn reissue(&self, stale: &str) -> Result<String> {
        let _guard = self.cache_lock.lock().await;

        if let Some(credential) = self.store.load_credential()? {
            if credential.token != stale && credential.is_valid() {
                return Ok(credential.token);
            }
        }

        self.login_and_save().await
    }

    /// Log in with configured credentials and overwrite the cache.
    ///
    /// Callers must hold `cache_lock`.
    async fn login_and_save(&self) -> Result<String> {
        let username = self.config.get(config::USERNAME).ok_or_else(|| {
            AuthError::Configuration(format!("{} is not set", config::USERNAME))
        })?;
        let password = self.config.get(config::PASSWORD).ok_or_else(|| {
            AuthError::Configuration(format!("{} is not set", config::PASSWORD))
        })?;

        let credential = self.login.login(&username, &password).await?;
        self.store.save_credential(&credential)?;

        tracing::debug!(expires_at = %credential.expires_at, "Cached new credential");
        Ok(credential.token)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        params: &[(&str, &str)],
        project: &ProjectId,
        token: &str,
    ) -> Result<HttpResponse> {
        let mut request = HttpRequest::new(method.clone(), url)
            .header("accept", "application/json")
            .header("project", project.as_str())
            .header("Authorization", format!("Bearer {token}"))
            .query(params);

        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .json(body.clone());
        }

        let response = self.transport.send(request).await?;
        tracing::debug!(method = %method, url = %url, status = response.status, "Platform call");
        Ok(response)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rio_store::{Credential, MemoryStore};
    use serde_json::json;

    use super::*;
    use crate::config::StaticConfig;
    use crate::transport::MockTransport;

    const LOGIN: &str = "https://auth.test/user/login";
    const PACKAGES: &str = "https://catalog.test/v2/catalog";

    struct Fixture {
        mock: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        session: Session,
    }

    fn fixture(config: StaticConfig) -> Fixture {
        let mock = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let settings = SessionSettings {
            login_url: LOGIN.to_string(),
            token_validity: Duration::from_secs(3600),
            expiry_skew: Duration::from_secs(60),
        };
        let session = Session::new(mock.clone(), store.clone(), Arc::new(config), &settings);
        Fixture {
            mock,
            store,
            session,
        }
    }

    fn configured() -> StaticConfig {
        StaticConfig::new()
            .with(config::PROJECT_ID, "project-1")
            .with(config::USERNAME, "ops@example.com")
            .with(config::PASSWORD, "secret")
    }

    fn login_returns(mock: &MockTransport, token: &str) {
        mock.respond_json(Method::POST, LOGIN, 200, &json!({"data": {"token": token}}));
    }

    fn credential(token: &str, valid_for: chrono::Duration) -> Credential {
        let now = Utc::now();
        Credential {
            token: token.to_string(),
            issued_at: now - chrono::Duration::hours(1),
            expires_at: now + valid_for,
        }
    }

    async fn list(session: &Session) -> Result<Value> {
        session
            .authenticated_request(Method::GET, PACKAGES, None, &[], &RequestScope::ambient())
            .await
    }

    #[tokio::test]
    async fn credential_reused_across_calls() {
        let f = fixture(configured());
        login_returns(&f.mock, "tok-1");
        f.mock.respond_json(Method::GET, PACKAGES, 200, &json!({"services": []}));

        assert_eq!(list(&f.session).await.unwrap(), json!({"services": []}));
        list(&f.session).await.unwrap();

        assert_eq!(f.mock.count(&Method::POST, LOGIN), 1);
        assert_eq!(f.store.load_credential().unwrap().unwrap().token, "tok-1");
    }

    #[tokio::test]
    async fn expired_credential_triggers_one_login() {
        let f = fixture(configured());
        f.store
            .save_credential(&credential("old", chrono::Duration::seconds(-5)))
            .unwrap();
        login_returns(&f.mock, "tok-2");
        f.mock.respond(Method::GET, PACKAGES, 200, "{}");

        list(&f.session).await.unwrap();

        assert_eq!(f.mock.count(&Method::POST, LOGIN), 1);
        let call = &f.mock.requests()[1];
        assert_eq!(call.header_value("authorization"), Some("Bearer tok-2"));
    }

    #[tokio::test]
    async fn unauthorized_cached_token_reauthenticates_once() {
        let f = fixture(configured());
        f.store
            .save_credential(&credential("revoked", chrono::Duration::hours(1)))
            .unwrap();
        login_returns(&f.mock, "tok-3");
        f.mock.respond(Method::GET, PACKAGES, 401, "");
        f.mock.respond_json(Method::GET, PACKAGES, 200, &json!({"ok": true}));

        assert_eq!(list(&f.session).await.unwrap(), json!({"ok": true}));

        assert_eq!(f.mock.count(&Method::POST, LOGIN), 1);
        assert_eq!(f.mock.count(&Method::GET, PACKAGES), 2);
        let retry = f.mock.requests().pop().unwrap();
        assert_eq!(retry.header_value("authorization"), Some("Bearer tok-3"));
        assert_eq!(f.store.load_credential().unwrap().unwrap().token, "tok-3");
    }

    #[tokio::test]
    async fn second_unauthorized_propagates() {
        let f = fixture(configured());
        f.store
            .save_credential(&credential("revoked", chrono::Duration::hours(1)))
            .unwrap();
        login_returns(&f.mock, "tok-4");
        f.mock.respond(Method::GET, PACKAGES, 401, r#"{"error":"unauthorized"}"#);

        let err = list(&f.session).await.unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(f.mock.count(&Method::POST, LOGIN), 1);
        assert_eq!(f.mock.count(&Method::GET, PACKAGES), 2);
    }

    #[tokio::test]
    async fn explicit_token_is_never_refreshed() {
        let f = fixture(configured());
        f.mock.respond(Method::GET, PACKAGES, 401, "");

        let scope = RequestScope::ambient().with_token("caller-token");
        let err = f
            .session
            .authenticated_request(Method::GET, PACKAGES, None, &[], &scope)
            .await
            .unwrap_err();

        assert!(err.is_unauthorized());
        assert_eq!(f.mock.count(&Method::POST, LOGIN), 0);
        assert_eq!(f.mock.count(&Method::GET, PACKAGES), 1);
        assert!(f.store.load_credential().unwrap().is_none());
    }

    #[tokio::test]
    async fn static_token_from_config_is_explicit() {
        let f = fixture(configured().with(config::AUTH_TOKEN, "static-token"));
        f.mock.respond(Method::GET, PACKAGES, 401, "");

        assert!(list(&f.session).await.unwrap_err().is_unauthorized());
        assert_eq!(f.mock.count(&Method::POST, LOGIN), 0);
        assert_eq!(
            f.mock.requests()[0].header_value("authorization"),
            Some("Bearer static-token")
        );
    }

    #[tokio::test]
    async fn missing_project_is_configuration_error() {
        let f = fixture(StaticConfig::new().with(config::USERNAME, "ops@example.com"));

        let err = list(&f.session).await.unwrap_err();

        assert!(err.is_configuration());
        assert!(f.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_login_credentials_is_configuration_error() {
        let f = fixture(StaticConfig::new().with(config::PROJECT_ID, "project-1"));

        let err = list(&f.session).await.unwrap_err();

        assert!(err.is_configuration());
        assert!(f.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn explicit_project_overrides_config() {
        let f = fixture(configured());
        login_returns(&f.mock, "tok");
        f.mock.respond(Method::GET, PACKAGES, 200, "");

        let scope = RequestScope::project(ProjectId::new("project-2").unwrap());
        let doc = f
            .session
            .authenticated_request(Method::GET, PACKAGES, None, &[], &scope)
            .await
            .unwrap();

        assert_eq!(doc, json!({}));
        assert_eq!(f.mock.requests()[1].header_value("project"), Some("project-2"));
    }

    #[tokio::test]
    async fn headers_and_body() {
        let f = fixture(configured());
        login_returns(&f.mock, "tok");
        f.mock.respond(Method::GET, PACKAGES, 200, "{}");
        f.mock.respond(Method::POST, PACKAGES, 200, "{}");

        list(&f.session).await.unwrap();
        let body = json!({"name": "grafana"});
        f.session
            .authenticated_request(
                Method::POST,
                PACKAGES,
                Some(&body),
                &[("package_uid", "pkg-1")],
                &RequestScope::ambient(),
            )
            .await
            .unwrap();

        let requests = f.mock.requests();
        let get = &requests[1];
        assert_eq!(get.header_value("accept"), Some("application/json"));
        assert_eq!(get.header_value("project"), Some("project-1"));
        assert_eq!(get.header_value("content-type"), None);

        let post = &requests[2];
        assert_eq!(post.header_value("content-type"), Some("application/json"));
        assert_eq!(post.body, Some(body));
        assert_eq!(
            post.params,
            vec![("package_uid".to_string(), "pkg-1".to_string())]
        );
    }

    #[tokio::test]
    async fn failure_status_is_not_retried() {
        let f = fixture(configured());
        login_returns(&f.mock, "tok");
        f.mock.respond(Method::GET, PACKAGES, 500, r#"{"error":"boom"}"#);

        let err = list(&f.session).await.unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert_eq!(f.mock.count(&Method::GET, PACKAGES), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_login() {
        let f = fixture(configured());
        login_returns(&f.mock, "tok");
        f.mock.respond(Method::GET, PACKAGES, 200, "{}");

        let (a, b) = tokio::join!(list(&f.session), list(&f.session));
        a.unwrap();
        b.unwrap();

        assert_eq!(f.mock.count(&Method::POST, LOGIN), 1);
    }

    #[tokio::test]
    async fn fetch_document_sends_no_credentials() {
        let f = fixture(StaticConfig::new());
        let url = "https://manifests.test/grafana.json";
        f.mock.respond_json(Method::GET, url, 200, &json!({"name": "grafana"}));

        let doc = f.session.fetch_document(url).await.unwrap();

        assert_eq!(doc, json!({"name": "grafana"}));
        assert_eq!(f.mock.requests()[0].header_value("authorization"), None);
    }
}
