use serde::{Deserialize, Serialize};

/// A signed-in principal as reported by the identity provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl Identity {
    pub fn new<S: Into<String>>(id: S, email: Option<String>) -> Self {
        Self { id: id.into(), email }
    }

    /// Email when known, otherwise the provider id.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(self.id.as_str())
    }
}
