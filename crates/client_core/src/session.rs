//! Process-wide session: who is signed in and with which role.

use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::Role,
    protocol::{LoginRequest, User},
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{
    error::{ClientError, ClientResult},
    query::{QueryClient, ResourceKey},
    resources::{whoami_query, WHOAMI},
    HealthApi,
};

/// Capability handed to components that need the current identity.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_user(&self) -> Option<User>;

    async fn role(&self) -> Option<Role> {
        self.current_user().await.map(|user| user.role)
    }

    async fn require_user(&self) -> ClientResult<User> {
        self.current_user().await.ok_or(ClientError::NotSignedIn)
    }
}

pub struct SessionContext {
    api: Arc<dyn HealthApi>,
    queries: Arc<QueryClient>,
    user: RwLock<Option<User>>,
}

impl SessionContext {
    pub fn new(api: Arc<dyn HealthApi>, queries: Arc<QueryClient>) -> Arc<Self> {
        Arc::new(Self {
            api,
            queries,
            user: RwLock::new(None),
        })
    }

    pub fn api(&self) -> &Arc<dyn HealthApi> {
        &self.api
    }

    pub fn queries(&self) -> &Arc<QueryClient> {
        &self.queries
    }

    /// Loads the signed-in identity for an existing token (e.g. on startup).
    pub async fn initialize(&self) -> ClientResult<User> {
        let user = self
            .queries
            .fetch_query(&whoami_query(&self.api))
            .await
            .into_result()?;
        let user = (*user).clone();
        info!(
            user_id = user.id.0,
            role = user.role.as_str(),
            "session: initialized"
        );
        *self.user.write().await = Some(user.clone());
        Ok(user)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> ClientResult<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::PreconditionNotMet(
                "email and password are required",
            ));
        }

        let response = self
            .api
            .login(LoginRequest {
                email: email.trim().to_string(),
                password: password.to_string(),
            })
            .await?;

        // A previous identity's cached reads must not leak into this one.
        self.queries.clear().await;
        self.api
            .set_access_token(Some(response.access_token))
            .await;
        self.queries
            .set_query_data(&ResourceKey::new(WHOAMI), response.user)
            .await;

        match self.initialize().await {
            Ok(user) => Ok(user),
            Err(err) => {
                warn!(error = %err, "session: sign-in could not load identity");
                self.sign_out().await;
                Err(err)
            }
        }
    }

    /// Drops the identity, the token and every cached read.
    pub async fn sign_out(&self) {
        let previous = self.user.write().await.take();
        self.api.set_access_token(None).await;
        self.queries.clear().await;
        if let Some(user) = previous {
            info!(user_id = user.id.0, "session: signed out");
        }
    }
}

#[async_trait]
impl SessionProvider for SessionContext {
    async fn current_user(&self) -> Option<User> {
        self.user.read().await.clone()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
