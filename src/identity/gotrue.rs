//! Identity provider backed by a hosted GoTrue-compatible auth service.
//! The session is kept in memory and, when a session file is configured, persisted as
//! JSON so the next run can restore it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::principal::Identity;
use super::provider::{AuthChange, IdentityProvider, AUTH_EVENT_CAPACITY};
use super::session::Session;
use crate::config::{join_endpoint, PortalConfig};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorPayload {
    fn text(self) -> Option<String> {
        self.error_description.or(self.msg).or(self.message).or(self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grant {
    Password,
    RefreshToken,
}

impl Grant {
    fn as_str(self) -> &'static str {
        match self {
            Grant::Password => "password",
            Grant::RefreshToken => "refresh_token",
        }
    }
}

pub struct GoTrueProvider {
    base: Url,
    anon_key: String,
    client: reqwest::Client,
    session_file: Option<PathBuf>,
    current: RwLock<Option<Session>>,
    tx: broadcast::Sender<AuthChange>,
}

impl GoTrueProvider {
    pub fn new(cfg: &PortalConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(cfg.http_timeout).build()?;
        let (tx, _rx) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Ok(Self {
            base: cfg.auth_url.clone(),
            anon_key: cfg.anon_key.clone(),
            client,
            session_file: cfg.session_file.clone(),
            current: RwLock::new(None),
            tx,
        })
    }

    fn endpoint(&self, path: &str) -> Url { join_endpoint(&self.base, path) }

    async fn token_request(&self, grant: Grant, body: serde_json::Value) -> AuthResult<Session> {
        let url = self.endpoint("/auth/v1/token");
        let resp = self.client
            .post(url)
            .query(&[("grant_type", grant.as_str())])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.json::<ErrorPayload>().await.unwrap_or_default().text();
            let rejected = matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY);
            return Err(match (grant, rejected) {
                (Grant::Password, true) => AuthError::invalid_credentials(detail.unwrap_or_else(|| "Invalid login credentials".to_string())),
                _ => AuthError::provider(detail.unwrap_or_else(|| format!("auth service error: HTTP {}", status.as_u16()))),
            });
        }
        let tr: TokenResponse = resp.json().await?;
        Ok(session_from(tr, Utc::now()))
    }

    /// Exchange the refresh token for a new session and announce it.
    pub async fn refresh_session(&self) -> AuthResult<Session> {
        let current = self.current.read().clone();
        let Some(refresh) = current.and_then(|s| s.refresh_token) else {
            return Err(AuthError::provider("no refresh token available"));
        };
        let s = self.refresh_with(&refresh).await?;
        self.tx.send(AuthChange::TokenRefreshed(s.clone())).ok();
        Ok(s)
    }

    async fn refresh_with(&self, refresh_token: &str) -> AuthResult<Session> {
        let s = self.token_request(Grant::RefreshToken, serde_json::json!({ "refresh_token": refresh_token })).await?;
        self.store(Some(&s));
        debug!(target: "dojo::auth", "refreshed session for {}", s.identity.id);
        Ok(s)
    }

    fn store(&self, s: Option<&Session>) {
        *self.current.write() = s.cloned();
        if let Some(path) = &self.session_file {
            match s {
                Some(s) => write_session_file(path, s),
                None => remove_session_file(path),
            }
        }
    }
}

fn session_from(tr: TokenResponse, now: DateTime<Utc>) -> Session {
    let expires_at = tr.expires_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| tr.expires_in.map(|secs| now + Duration::seconds(secs)));
    Session {
        identity: Identity::new(tr.user.id, tr.user.email),
        access_token: tr.access_token,
        refresh_token: tr.refresh_token,
        expires_at,
    }
}

fn read_session_file(path: &Path) -> Option<Session> {
    let text = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<Session>(&text) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(target: "dojo::auth", "ignoring unreadable session file {}: {}", path.display(), e);
            None
        }
    }
}

fn write_session_file(path: &Path, s: &Session) {
    // Best-effort: a read-only location only costs the next restore.
    if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
    match serde_json::to_string_pretty(s) {
        Ok(text) => {
            if let Err(e) = std::fs::write(path, text) {
                warn!(target: "dojo::auth", "could not persist session to {}: {}", path.display(), e);
            }
        }
        Err(e) => warn!(target: "dojo::auth", "could not encode session: {}", e),
    }
}

fn remove_session_file(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(target: "dojo::auth", "could not remove session file {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueProvider {
    async fn get_session(&self) -> AuthResult<Option<Session>> {
        let cached = self.current.read().clone();
        let candidate = match cached {
            Some(s) => Some(s),
            None => self.session_file.as_deref().and_then(read_session_file),
        };
        let Some(s) = candidate else { return Ok(None) };
        if !s.is_expired() {
            *self.current.write() = Some(s.clone());
            return Ok(Some(s));
        }
        let Some(refresh) = s.refresh_token.clone() else {
            self.store(None);
            return Ok(None);
        };
        match self.refresh_with(&refresh).await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(e) => {
                info!(target: "dojo::auth", "stored session expired and could not be refreshed: {}", e);
                self.store(None);
                Ok(None)
            }
        }
    }

    fn current_session(&self) -> Option<Session> { self.current.read().clone() }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> { self.tx.subscribe() }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        let s = self.token_request(Grant::Password, serde_json::json!({ "email": email, "password": password })).await?;
        self.store(Some(&s));
        self.tx.send(AuthChange::SignedIn(s.clone())).ok();
        Ok(s)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        let current = self.current.read().clone();
        if let Some(s) = current {
            let url = self.endpoint("/auth/v1/logout");
            let resp = self.client
                .post(url)
                .header("apikey", &self.anon_key)
                .bearer_auth(&s.access_token)
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let detail = resp.json::<ErrorPayload>().await.unwrap_or_default().text();
                return Err(AuthError::provider(detail.unwrap_or_else(|| format!("sign-out failed: HTTP {}", status.as_u16()))));
            }
        }
        self.store(None);
        self.tx.send(AuthChange::SignedOut).ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in: Option<i64>, expires_at: Option<i64>) -> TokenResponse {
        TokenResponse {
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            expires_in,
            expires_at,
            user: UserPayload { id: "u1".into(), email: Some("a@dojo.test".into()) },
        }
    }

    #[test]
    fn expiry_prefers_absolute_timestamp() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let s = session_from(token(Some(3600), Some(1_700_000_100)), now);
        assert_eq!(s.expires_at.unwrap().timestamp(), 1_700_000_100);
        let s = session_from(token(Some(3600), None), now);
        assert_eq!(s.expires_at.unwrap().timestamp(), 1_700_003_600);
        let s = session_from(token(None, None), now);
        assert!(s.expires_at.is_none());
    }

    #[test]
    fn error_payload_prefers_description() {
        let p: ErrorPayload = serde_json::from_str(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#).unwrap();
        assert_eq!(p.text().as_deref(), Some("Invalid login credentials"));
        let p: ErrorPayload = serde_json::from_str(r#"{"msg":"Email not confirmed"}"#).unwrap();
        assert_eq!(p.text().as_deref(), Some("Email not confirmed"));
    }

    #[test]
    fn session_file_roundtrip_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let now = Utc::now();
        let s = session_from(token(Some(60), None), now);
        write_session_file(&path, &s);
        assert_eq!(read_session_file(&path), Some(s));
        remove_session_file(&path);
        assert!(!path.exists());
        assert!(read_session_file(&path).is_none());
    }
}
