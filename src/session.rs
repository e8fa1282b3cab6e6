//! Session gate: answers "who is calling" for views and mutations.
//!
//! The identity itself comes from an [`IdentityProvider`]. Provider failures
//! never bubble up: the gate logs them and reports no user, so the caller
//! degrades to the unauthenticated view instead of erroring.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::config::Auth;
use crate::model::User;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn get_user(&self) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct SessionGate {
    provider: Arc<dyn IdentityProvider>,
}

impl SessionGate {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub fn from_provider<P: IdentityProvider + 'static>(provider: P) -> Self {
        Self::new(Arc::new(provider))
    }

    pub async fn current_user(&self) -> Option<User> {
        match self.provider.get_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %crate::unpack_error(&*e), "identity check failed, treating caller as signed out");
                None
            }
        }
    }
}

/// Fixed identity, used for tests and single-user setups.
pub struct StaticIdentity(Option<User>);

impl StaticIdentity {
    pub fn signed_in(user: User) -> Self {
        Self(Some(user))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn get_user(&self) -> anyhow::Result<Option<User>> {
        Ok(self.0.clone())
    }
}

/// Identity asserted by an authenticating reverse proxy in front of the
/// service. Sign-in itself happens at the proxy.
pub struct ProxyHeaderIdentity {
    user: Option<User>,
}

impl ProxyHeaderIdentity {
    pub fn from_headers(headers: &HeaderMap, auth: &Auth) -> anyhow::Result<Self> {
        let user_id = header_value(headers, &auth.user_header)?;
        let user = match user_id {
            Some(id) => {
                let mut user = User::new(id);
                if let Some(email) = header_value(headers, &auth.email_header)? {
                    user = user.with_email(email);
                }
                Some(user)
            }
            None => auth.dev_user.as_ref().map(|id| User::new(id.clone())),
        };
        Ok(Self { user })
    }
}

#[async_trait]
impl IdentityProvider for ProxyHeaderIdentity {
    async fn get_user(&self) -> anyhow::Result<Option<User>> {
        Ok(self.user.clone())
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> anyhow::Result<Option<String>> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|e| anyhow::anyhow!("header {name} is not valid text: {e}"))?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(value.to_string()))
}

/// Provider whose header could not be read. Surfaces the error through the
/// gate so it is logged and degraded like any other identity failure.
pub struct FailedIdentity(pub String);

#[async_trait]
impl IdentityProvider for FailedIdentity {
    async fn get_user(&self) -> anyhow::Result<Option<User>> {
        anyhow::bail!("{}", self.0)
    }
}

/// Builds the gate for one request.
pub fn gate_for_request(headers: &HeaderMap, auth: &Auth) -> SessionGate {
    match ProxyHeaderIdentity::from_headers(headers, auth) {
        Ok(provider) => SessionGate::from_provider(provider),
        Err(e) => SessionGate::from_provider(FailedIdentity(e.to_string())),
    }
}
