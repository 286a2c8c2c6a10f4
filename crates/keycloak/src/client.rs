//! Authenticated access to the Keycloak admin REST API.

use std::fmt;
use std::time::Duration;

use habsync_core::{EntityKind, Error, Result};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::representation::TokenResponse;

/// Client used for the password grant.
const ADMIN_CLI: &str = "admin-cli";

/// Where and how to log in.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: Url,
    /// Realm being administered.
    pub realm: String,
    /// Realm holding the admin account.
    pub login_realm: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url.as_str())
            .field("realm", &self.realm)
            .field("login_realm", &self.login_realm)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// What a failed call was about, for error mapping.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub operation: &'static str,
    pub kind: EntityKind,
    pub key: &'a str,
}

impl<'a> Target<'a> {
    pub const fn new(operation: &'static str, kind: EntityKind, key: &'a str) -> Self {
        Self { operation, kind, key }
    }
}

/// Map an HTTP failure to the shared taxonomy.
///
/// 409 is a conflict, 404 a missing entity, any other 4xx a rejected call,
/// everything else a transport failure.
#[must_use]
pub fn status_error(target: Target<'_>, status: StatusCode, body: &str) -> Error {
    let reason = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    match status {
        StatusCode::CONFLICT => Error::conflict(target.kind, target.key, None),
        StatusCode::NOT_FOUND => Error::not_found(target.kind, target.key),
        s if s.is_client_error() => Error::rejected(target.operation, reason),
        _ => Error::transport(target.operation, reason),
    }
}

fn transport(operation: &str, e: &reqwest::Error) -> Error {
    Error::transport(operation, e.to_string())
}

/// HTTP client holding a cached admin token.
pub struct AdminClient {
    http: Client,
    credentials: Credentials,
    token: RwLock<Option<String>>,
}

impl fmt::Debug for AdminClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminClient")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl AdminClient {
    /// Build the HTTP client. No request is made before the first call.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the HTTP client cannot be built.
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::invalid_input(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            credentials,
            token: RwLock::new(None),
        })
    }

    /// Url of `segments` below the server url, each segment escaped.
    fn endpoint<S: AsRef<str>>(&self, segments: impl IntoIterator<Item = S>) -> Result<Url> {
        let mut url = self.credentials.url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::invalid_input(format!("{} cannot hold a path", self.credentials.url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Absolute url of an admin resource of the managed realm.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the server url cannot hold a path.
    pub fn admin_url(&self, path: &[&str]) -> Result<Url> {
        let realm = ["admin", "realms", self.credentials.realm.as_str()];
        self.endpoint(realm.iter().chain(path))
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let url = self.endpoint([
            "realms",
            self.credentials.login_realm.as_str(),
            "protocol",
            "openid-connect",
            "token",
        ])?;
        let params = [
            ("grant_type", "password"),
            ("client_id", ADMIN_CLI),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        let response = self
            .http
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(|e| transport("log in", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport("log in", format!("HTTP {status}: {body}")));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| transport("log in", &e))?;

        info!(username = %self.credentials.username, realm = %self.credentials.login_realm, "logged in to keycloak");
        *self.token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, &str)],
        body: Option<&B>,
        operation: &str,
    ) -> Result<Response> {
        let token = self.token().await?;
        debug!(method = %method, url = %url, "keycloak request");
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| transport(operation, &e))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            // Forget the expired token, the next call logs in again.
            *self.token.write().await = None;
        }
        Ok(response)
    }

    /// Send a request and fail on any non-success status.
    ///
    /// # Errors
    ///
    /// Returns the mapped status error, or `Transport` when the call fails.
    pub async fn call<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, &str)],
        body: Option<&B>,
        target: Target<'_>,
    ) -> Result<Response> {
        let response = self
            .send(method, url, query, body, target.operation)
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(target, status, &body))
    }

    /// GET a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the mapped status error, or `Transport` when the body does not decode.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, &str)],
        target: Target<'_>,
    ) -> Result<T> {
        self.call::<()>(Method::GET, url, query, None, target)
            .await?
            .json()
            .await
            .map_err(|e| transport(target.operation, &e))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn target() -> Target<'static> {
        Target::new("create user", EntityKind::User, "jane@x.org")
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(target(), StatusCode::CONFLICT, ""),
            Error::Conflict { .. }
        ));
        assert!(matches!(
            status_error(target(), StatusCode::NOT_FOUND, ""),
            Error::NotFound { kind: EntityKind::User, .. }
        ));
        assert!(matches!(
            status_error(target(), StatusCode::FORBIDDEN, "denied"),
            Error::Rejected { .. }
        ));
        assert!(matches!(
            status_error(target(), StatusCode::BAD_GATEWAY, ""),
            Error::Transport { .. }
        ));
    }

    fn client(url: &str) -> AdminClient {
        AdminClient::new(
            Credentials {
                url: Url::parse(url).unwrap(),
                realm: "signaux faibles".into(),
                login_realm: "master".into(),
                username: "kc-admin".into(),
                password: "secret".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_admin_url_escapes_segments() {
        let client = client("https://auth.example.org/");

        let url = client
            .admin_url(&["clients", "c-1", "roles", "lecture#restreinte/a?b"])
            .unwrap();

        assert_eq!(
            url.as_str(),
            "https://auth.example.org/admin/realms/signaux%20faibles/clients/c-1/roles/lecture%23restreinte%2Fa%3Fb"
        );
    }

    #[test]
    fn test_admin_url_keeps_server_path() {
        let client = client("https://example.org/auth");

        let url = client.admin_url(&["users"]).unwrap();

        assert_eq!(url.as_str(), "https://example.org/auth/admin/realms/signaux%20faibles/users");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            url: Url::parse("https://auth.example.org").unwrap(),
            realm: "master".into(),
            login_realm: "master".into(),
            username: "kc-admin".into(),
            password: "hunter2".into(),
        };

        let debug = format!("{credentials:?}");

        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("kc-admin"));
    }
}
