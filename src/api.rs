//! REST client for the school's backend. The schema is owned by the backend, so payloads
//! are handed back as JSON values; only the role endpoint is decoded here.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{join_endpoint, PortalConfig};
use crate::error::{ApiError, RoleFetchError};
use crate::identity::{Role, RoleBackend, Session};

#[derive(Debug, Deserialize)]
struct RoleResponse {
    role: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(cfg: &PortalConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(cfg.http_timeout).build()?;
        Ok(Self { base: cfg.api_url.clone(), client })
    }

    pub fn base(&self) -> &Url { &self.base }

    /// Authenticated view of the client. Fails without a session, before any request.
    pub fn signed_in<'a>(&'a self, session: Option<&'a Session>) -> Result<SignedInApi<'a>, ApiError> {
        match session {
            Some(session) => Ok(SignedInApi { api: self, session }),
            None => Err(ApiError::NotSignedIn),
        }
    }

    /// Public calendar for one month; no auth header is sent.
    pub async fn get_calendar_events(&self, year: i32, month: u32) -> Result<Value, ApiError> {
        self.get(&format!("/calendar/year/{year}/month/{month}"), None).await
    }

    fn url(&self, endpoint: &str) -> Url { join_endpoint(&self.base, endpoint) }

    async fn get(&self, endpoint: &str, bearer: Option<&str>) -> Result<Value, ApiError> {
        let url = self.url(endpoint);
        debug!(target: "dojo::api", "GET {} auth={}", endpoint, bearer.is_some());
        let mut req = self.client.get(url);
        if let Some(token) = bearer { req = req.bearer_auth(token); }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.json::<ErrorBody>().await.ok();
            return Err(ApiError::Status { status: status.as_u16(), detail: error_detail(body, status, bearer.is_some()) });
        }
        resp.json::<Value>().await.map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// `body` is `None` when the error response was not JSON at all.
fn error_detail(body: Option<ErrorBody>, status: StatusCode, authed: bool) -> String {
    let Some(body) = body else { return "API request failed".to_string() };
    match body.detail {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(other) if !other.is_null() => other.to_string(),
        _ if authed => "API request failed".to_string(),
        _ => format!("API request failed: {} {}", status.as_u16(), status.canonical_reason().unwrap_or("")).trim_end().to_string(),
    }
}

fn seg(id: &str) -> String { urlencoding::encode(id).into_owned() }

pub struct SignedInApi<'a> {
    api: &'a ApiClient,
    session: &'a Session,
}

impl SignedInApi<'_> {
    async fn get(&self, endpoint: &str) -> Result<Value, ApiError> {
        self.api.get(endpoint, Some(&self.session.access_token)).await
    }

    pub async fn get_user_role(&self) -> Result<Role, ApiError> {
        let v = self.get("/me/role").await?;
        let rr: RoleResponse = serde_json::from_value(v).map_err(|e| ApiError::Decode(e.to_string()))?;
        rr.role.parse::<Role>().map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_person(&self, person_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/person/{}", seg(person_id))).await
    }

    pub async fn get_my_persons(&self) -> Result<Value, ApiError> { self.get("/person/me").await }

    pub async fn get_promotions_for_student(&self, student_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/promotions/student/{}", seg(student_id))).await
    }

    pub async fn get_current_rank(&self, student_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/promotions/current/student/{}", seg(student_id))).await
    }

    pub async fn get_awards_for_student(&self, student_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/awards/student/{}", seg(student_id))).await
    }

    pub async fn get_belt(&self, belt_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/belts/{}", seg(belt_id))).await
    }

    pub async fn get_all_belts(&self) -> Result<Value, ApiError> { self.get("/belts/").await }

    pub async fn get_location(&self, location_id: &str) -> Result<Value, ApiError> {
        self.get(&format!("/location/{}", seg(location_id))).await
    }

    pub async fn get_all_students(&self) -> Result<Value, ApiError> { self.get("/students/").await }
}

#[async_trait]
impl RoleBackend for ApiClient {
    async fn fetch_role(&self, session: &Session) -> Result<Role, RoleFetchError> {
        Ok(self.signed_in(Some(session))?.get_user_role().await?)
    }
}
