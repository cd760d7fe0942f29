//! Authentication capability.
//!
//! The engine never inspects tokens itself; it exchanges an opaque token
//! string for a principal id through this seam and holds only principal ids
//! afterwards.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::model::PrincipalId;

/// Resolves an opaque token to a principal id.
#[async_trait]
pub trait AuthBroker: Send + Sync {
    async fn verify(&self, token: &str) -> Result<PrincipalId>;
}

/// Fixed token table; useful for tests and single-team deployments.
#[derive(Default)]
pub struct StaticTokenBroker {
    tokens: HashMap<String, PrincipalId>,
}

impl StaticTokenBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: PrincipalId) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl AuthBroker for StaticTokenBroker {
    async fn verify(&self, token: &str) -> Result<PrincipalId> {
        self.tokens.get(token).cloned().ok_or(Error::Forbidden)
    }
}

/// Treats every non-empty token as the principal id itself.
///
/// Local development only; construction logs a warning.
pub struct InsecureBroker;

impl InsecureBroker {
    pub fn new() -> Self {
        tracing::warn!("insecure auth broker active: tokens are taken as principal ids");
        Self
    }
}

impl Default for InsecureBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBroker for InsecureBroker {
    async fn verify(&self, token: &str) -> Result<PrincipalId> {
        if token.is_empty() {
            return Err(Error::Forbidden);
        }
        Ok(PrincipalId::new(token))
    }
}
