use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::UserId,
    error::ApiError,
    protocol::{
        AckResponse, ChatMessage, DashboardSnapshot, DevicePairing, LoginRequest, LoginResponse,
        MedicalProfile, PairDeviceRequest, ProfileSettingsUpdate, Recommendation,
        ResetPasswordRequest, SendChatMessage, SummaryData, User,
    },
};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

pub mod chat;
pub mod config;
pub mod error;
pub mod mutation;
pub mod notice;
pub mod query;
pub mod resources;
pub mod session;

pub use config::ClientSettings;
pub use error::{ClientError, ClientResult};
pub use mutation::{Mutation, MutationState};
pub use notice::{Notice, NoticeLevel, Notices};
pub use query::{Query, QueryClient, QueryObserver, QueryState, ResourceKey};
pub use session::{SessionContext, SessionProvider};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Remote endpoints the client consumes. Bindings only ever talk to this seam.
#[async_trait]
pub trait HealthApi: Send + Sync {
    async fn login(&self, request: LoginRequest) -> ClientResult<LoginResponse>;
    async fn set_access_token(&self, token: Option<String>);
    async fn whoami(&self) -> ClientResult<User>;
    async fn medical_profile(&self) -> ClientResult<MedicalProfile>;
    async fn user_profiles(&self, user_id: UserId) -> ClientResult<Vec<MedicalProfile>>;
    async fn caregiver_patients(&self, caregiver_id: UserId) -> ClientResult<Vec<User>>;
    async fn dashboard_snapshot(&self) -> ClientResult<DashboardSnapshot>;
    async fn recommendations(&self) -> ClientResult<Vec<Recommendation>>;
    async fn summary(&self) -> ClientResult<SummaryData>;
    async fn chat_messages(&self, room_id: &str) -> ClientResult<Vec<ChatMessage>>;
    async fn update_settings(&self, update: ProfileSettingsUpdate) -> ClientResult<AckResponse>;
    async fn pair_device(&self, request: PairDeviceRequest) -> ClientResult<DevicePairing>;
    async fn reset_password(&self, request: ResetPasswordRequest) -> ClientResult<AckResponse>;
    async fn send_chat_message(
        &self,
        room_id: &str,
        message: SendChatMessage,
    ) -> ClientResult<ChatMessage>;
}

pub struct HttpHealthApi {
    http: Client,
    base_url: Url,
    access_token: RwLock<Option<String>>,
}

impl HttpHealthApi {
    pub fn new(base_url: &str) -> ClientResult<Self> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        Self::with_timeout(&settings.api_base_url, settings.request_timeout())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let base_url = Url::parse(base_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfig(format!(
                "api base url '{base_url}' cannot carry a path"
            )));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            http,
            base_url,
            access_token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidConfig("api base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.access_token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let url = self.endpoint(segments)?;
        debug!(method = "GET", url = %url, "api: request");
        let request = self.authorize(self.http.get(url).query(query)).await;
        read_json(request.send().await?).await
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> ClientResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments)?;
        debug!(method = "POST", url = %url, "api: request");
        // `json` also sets `Content-Type: application/json`.
        let request = self.authorize(self.http.post(url).json(body)).await;
        read_json(request.send().await?).await
    }
}

/// Any non-2xx status is a failure, whatever the body says.
async fn read_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = ApiError::from_body(&body)
            .map(|err| err.message)
            .unwrap_or_else(|| body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect());
        warn!(status = status.as_u16(), "api: request failed");
        return Err(ClientError::status(status, message));
    }

    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl HealthApi for HttpHealthApi {
    async fn login(&self, request: LoginRequest) -> ClientResult<LoginResponse> {
        self.post_json(&["auth", "login"], &request).await
    }

    async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    async fn whoami(&self) -> ClientResult<User> {
        self.get_json(&["api", "rooms", "whoami"], &[]).await
    }

    async fn medical_profile(&self) -> ClientResult<MedicalProfile> {
        self.get_json(&["api", "profile", "ehr"], &[]).await
    }

    async fn user_profiles(&self, user_id: UserId) -> ClientResult<Vec<MedicalProfile>> {
        self.get_json(&["api", "profile", "all"], &[("user_id", user_id.to_string())])
            .await
    }

    async fn caregiver_patients(&self, caregiver_id: UserId) -> ClientResult<Vec<User>> {
        let caregiver_id = caregiver_id.to_string();
        self.get_json(&["admin", "users", "patients", caregiver_id.as_str()], &[]).await
    }

    async fn dashboard_snapshot(&self) -> ClientResult<DashboardSnapshot> {
        self.get_json(&["api", "dashboard", "latest"], &[]).await
    }

    async fn recommendations(&self) -> ClientResult<Vec<Recommendation>> {
        self.get_json(&["api", "recommendations"], &[]).await
    }

    async fn summary(&self) -> ClientResult<SummaryData> {
        self.get_json(&["api", "summary"], &[]).await
    }

    async fn chat_messages(&self, room_id: &str) -> ClientResult<Vec<ChatMessage>> {
        self.get_json(&["api", "rooms", room_id, "messages"], &[]).await
    }

    async fn update_settings(&self, update: ProfileSettingsUpdate) -> ClientResult<AckResponse> {
        self.post_json(&["api", "profile", "settings"], &update).await
    }

    async fn pair_device(&self, request: PairDeviceRequest) -> ClientResult<DevicePairing> {
        self.post_json(&["device", "pair"], &request).await
    }

    async fn reset_password(&self, request: ResetPasswordRequest) -> ClientResult<AckResponse> {
        self.post_json(&["user", "reset-password"], &request).await
    }

    async fn send_chat_message(
        &self,
        room_id: &str,
        message: SendChatMessage,
    ) -> ClientResult<ChatMessage> {
        self.post_json(&["api", "rooms", room_id, "messages"], &message).await
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
