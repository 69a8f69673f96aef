//! Environment-driven configuration for the portal.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Url;

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub auth_url: Url,
    pub anon_key: String,
    pub api_url: Url,
    pub session_file: Option<PathBuf>,
    pub login_path: String,
    pub member_home: String,
    pub http_timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            auth_url: Url::parse("http://127.0.0.1:54321").expect("static url"),
            anon_key: String::new(),
            api_url: Url::parse("http://127.0.0.1:8000").expect("static url"),
            session_file: None,
            login_path: "/login".to_string(),
            member_home: "/member".to_string(),
            http_timeout: Duration::from_secs(15),
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("DOJO_AUTH_URL") {
            cfg.auth_url = Url::parse(&v).with_context(|| format!("DOJO_AUTH_URL is not a valid URL: '{v}'"))?;
        }
        if let Some(v) = get("DOJO_AUTH_ANON_KEY") { cfg.anon_key = v; }
        if let Some(v) = get("DOJO_API_URL") {
            cfg.api_url = Url::parse(&v).with_context(|| format!("DOJO_API_URL is not a valid URL: '{v}'"))?;
        }
        if let Some(v) = get("DOJO_SESSION_FILE") {
            if !v.trim().is_empty() { cfg.session_file = Some(PathBuf::from(v)); }
        }
        if let Some(v) = get("DOJO_LOGIN_PATH") { cfg.login_path = normalize_path(&v)?; }
        if let Some(v) = get("DOJO_MEMBER_HOME") { cfg.member_home = normalize_path(&v)?; }
        if let Some(v) = get("DOJO_HTTP_TIMEOUT_SECS") {
            let secs: u64 = v.trim().parse()
                .with_context(|| format!("DOJO_HTTP_TIMEOUT_SECS must be a whole number of seconds, got '{v}'"))?;
            cfg.http_timeout = Duration::from_secs(secs);
        }
        Ok(cfg)
    }
}

/// Resolve `endpoint` under `base`, keeping any path prefix the base carries
/// (`https://host/v1` + `/me/role` is `https://host/v1/me/role`).
pub fn join_endpoint(base: &Url, endpoint: &str) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), endpoint.trim_start_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn normalize_path(p: &str) -> Result<String> {
    let t = p.trim();
    if !t.starts_with('/') { return Err(anyhow!("route path must start with '/': '{t}'")); }
    Ok(t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = PortalConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.login_path, "/login");
        assert_eq!(cfg.member_home, "/member");
        assert_eq!(cfg.http_timeout, Duration::from_secs(15));
        assert!(cfg.session_file.is_none());
    }

    #[test]
    fn overrides_apply() {
        let cfg = PortalConfig::from_lookup(lookup(&[
            ("DOJO_API_URL", "https://api.example.test"),
            ("DOJO_SESSION_FILE", "/tmp/dojo.json"),
            ("DOJO_MEMBER_HOME", "/dashboard"),
            ("DOJO_HTTP_TIMEOUT_SECS", "3"),
        ])).unwrap();
        assert_eq!(cfg.api_url.as_str(), "https://api.example.test/");
        assert_eq!(cfg.session_file, Some(PathBuf::from("/tmp/dojo.json")));
        assert_eq!(cfg.member_home, "/dashboard");
        assert_eq!(cfg.http_timeout, Duration::from_secs(3));
    }

    #[test]
    fn endpoints_keep_base_prefix() {
        let root = Url::parse("http://127.0.0.1:8000").unwrap();
        assert_eq!(join_endpoint(&root, "/me/role").as_str(), "http://127.0.0.1:8000/me/role");
        for base in ["https://api.dojo.test/v1/", "https://api.dojo.test/v1"] {
            let base = Url::parse(base).unwrap();
            assert_eq!(join_endpoint(&base, "/me/role").as_str(), "https://api.dojo.test/v1/me/role");
            assert_eq!(join_endpoint(&base, "/belts/").as_str(), "https://api.dojo.test/v1/belts/");
        }
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(PortalConfig::from_lookup(lookup(&[("DOJO_AUTH_URL", "not a url")])).is_err());
        assert!(PortalConfig::from_lookup(lookup(&[("DOJO_HTTP_TIMEOUT_SECS", "soon")])).is_err());
        assert!(PortalConfig::from_lookup(lookup(&[("DOJO_LOGIN_PATH", "login")])).is_err());
    }
}
