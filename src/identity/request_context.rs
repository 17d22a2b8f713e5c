use std::collections::HashMap;

use crate::error::{AuthError, AuthResult};

use super::Identity;

/// Inbound call metadata: case-insensitive keys, possibly repeated values.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self { Self::default() }

    pub fn insert<K: AsRef<str>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.entry(key.as_ref().to_ascii_lowercase()).or_default().push(value.into());
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(|s| s.as_str())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter { md.insert(k, v); }
        md
    }
}

/// Per-call execution context handed to operation handlers.
///
/// `identity` is only ever set by the authorization gate after it resolved the
/// caller's session; handlers read it, they never write it.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub method: String,
    pub request_id: String,
    identity: Option<Identity>,
}

impl CallContext {
    pub fn new<S: Into<String>>(method: S) -> Self {
        Self { method: method.into(), request_id: uuid::Uuid::new_v4().to_string(), identity: None }
    }

    pub(crate) fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn identity(&self) -> Option<&Identity> { self.identity.as_ref() }

    pub fn require_identity(&self) -> AuthResult<&Identity> {
        self.identity.as_ref().ok_or_else(|| AuthError::unauthenticated("user not authenticated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserId;

    #[test]
    fn metadata_keys_are_case_insensitive_first_value_wins() {
        let md: Metadata = [("Session-Id", "a"), ("session-id", "b")].into_iter().collect();
        assert_eq!(md.get("SESSION-ID"), Some("a"));
        assert_eq!(md.get("other"), None);
        assert_eq!(Metadata::new().get("session-id"), None);
    }

    #[test]
    fn context_identity_starts_empty() {
        let ctx = CallContext::new("/auth.v1.AuthService/GetUserInfo");
        assert!(ctx.identity().is_none());
        assert_eq!(ctx.require_identity().unwrap_err().code_str(), "UNAUTHENTICATED");
        let ctx = ctx.with_identity(Identity::new(UserId(3)));
        assert_eq!(ctx.require_identity().unwrap().user_id, UserId(3));
        assert!(!ctx.request_id.is_empty());
    }
}
