//! Credential attachment.
//!
//! The client never authenticates on its own: it asks a [`CredentialSource`]
//! for the current token and attaches it to each outgoing request.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    hooks::{BeforeRequestHook, HookError},
    transport::Request,
};

/// Supplies the credential attached to outgoing requests.
#[async_trait]
pub trait CredentialSource: Send + Sync + fmt::Debug {
    /// Current token, or `None` when the caller is anonymous.
    async fn credential(&self) -> Result<Option<String>, HookError>;
}

#[async_trait]
impl<C: CredentialSource + ?Sized> CredentialSource for Arc<C> {
    async fn credential(&self) -> Result<Option<String>, HookError> {
        (**self).credential().await
    }
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl CredentialSource for StaticToken {
    async fn credential(&self) -> Result<Option<String>, HookError> {
        Ok(Some(self.token.clone()))
    }
}

/// A token that can be replaced at runtime (sign-in, refresh, sign-out).
#[derive(Clone, Default)]
pub struct SharedToken {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.token.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.token.read().is_some()
    }
}

impl fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedToken")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[async_trait]
impl CredentialSource for SharedToken {
    async fn credential(&self) -> Result<Option<String>, HookError> {
        Ok(self.token.read().clone())
    }
}

/// A credential accessor backed by a closure.
pub struct FnCredential<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    f: F,
}

impl<F> FnCredential<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnCredential<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnCredential")
    }
}

#[async_trait]
impl<F> CredentialSource for FnCredential<F>
where
    F: Fn() -> Option<String> + Send + Sync,
{
    async fn credential(&self) -> Result<Option<String>, HookError> {
        Ok((self.f)())
    }
}

/// Sets `Authorization: Bearer <token>` when a credential is available.
#[derive(Debug)]
pub struct BearerAuthHook<C> {
    source: C,
}

impl<C: CredentialSource> BearerAuthHook<C> {
    pub fn new(source: C) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<C: CredentialSource> BeforeRequestHook for BearerAuthHook<C> {
    async fn on_request(&self, request: &mut Request) -> Result<(), HookError> {
        if let Some(token) = self.source.credential().await? {
            request
                .headers
                .insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "bearer_auth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bearer_hook_attaches_token() {
        let hook = BearerAuthHook::new(StaticToken::new("secret"));
        let mut request = Request::get("https://example.com/api");
        hook.on_request(&mut request).await.unwrap();
        assert_eq!(request.header_value("authorization"), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn test_anonymous_requests_have_no_header() {
        let token = SharedToken::new();
        let hook = BearerAuthHook::new(token.clone());

        let mut request = Request::get("https://example.com/api");
        hook.on_request(&mut request).await.unwrap();
        assert!(request.header_value("authorization").is_none());

        token.set("fresh");
        let mut request = Request::get("https://example.com/api");
        hook.on_request(&mut request).await.unwrap();
        assert_eq!(request.header_value("authorization"), Some("Bearer fresh"));
    }

    #[tokio::test]
    async fn test_fn_credential() {
        let hook = BearerAuthHook::new(FnCredential::new(|| Some("from-closure".to_string())));
        let mut request = Request::get("https://example.com/api");
        hook.on_request(&mut request).await.unwrap();
        assert_eq!(request.header_value("Authorization"), Some("Bearer from-closure"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", StaticToken::new("secret"));
        assert!(!debug.contains("secret"));
    }
}
