//! In-memory [`HealthApi`] used by binding and session tests.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use shared::{
    domain::{MessageId, Role, UserId, UserStatus},
    protocol::{
        AckResponse, ChatMessage, DashboardSnapshot, DevicePairing, LoginRequest, LoginResponse,
        MedicalProfile, PairDeviceRequest, ProfileSettingsUpdate, Recommendation,
        ResetPasswordRequest, SendChatMessage, SummaryData, User,
    },
};

use crate::{error::ClientError, ClientResult, HealthApi};

pub(crate) const VALID_PASSWORD: &str = "correct horse";

pub(crate) fn sample_user(id: i64, role: Role) -> User {
    User {
        id: UserId(id),
        email: format!("user{id}@example.com"),
        full_name: format!("User {id}"),
        role,
        status: UserStatus::Active,
        caregiver_id: None,
    }
}

pub(crate) fn empty_profile(user_id: i64) -> MedicalProfile {
    MedicalProfile {
        user_id: UserId(user_id),
        date_of_birth: None,
        gender: None,
        height_cm: None,
        weight_kg: None,
        blood_type: None,
        allergies: Vec::new(),
        comorbidities: Default::default(),
        medications: Vec::new(),
        symptoms: Vec::new(),
    }
}

pub(crate) struct FakeApi {
    user: User,
    fail_with: Option<ClientError>,
    calls: Mutex<HashMap<&'static str, usize>>,
    token: Mutex<Option<String>>,
}

impl FakeApi {
    pub(crate) fn new(user: User) -> Self {
        Self {
            user,
            fail_with: None,
            calls: Mutex::new(HashMap::new()),
            token: Mutex::new(None),
        }
    }

    pub(crate) fn failing(user: User, error: ClientError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::new(user)
        }
    }

    pub(crate) fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, endpoint: &'static str) -> ClientResult<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(endpoint)
            .or_default() += 1;
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HealthApi for FakeApi {
    async fn login(&self, request: LoginRequest) -> ClientResult<LoginResponse> {
        self.record("login")?;
        if request.password != VALID_PASSWORD {
            return Err(ClientError::Status {
                status: 401,
                message: "invalid credentials".to_string(),
            });
        }
        Ok(LoginResponse {
            access_token: "token-abc".to_string(),
            user: self.user.clone(),
        })
    }

    async fn set_access_token(&self, token: Option<String>) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token;
    }

    async fn whoami(&self) -> ClientResult<User> {
        self.record("whoami")?;
        Ok(self.user.clone())
    }

    async fn medical_profile(&self) -> ClientResult<MedicalProfile> {
        self.record("medical_profile")?;
        Ok(empty_profile(self.user.id.0))
    }

    async fn user_profiles(&self, user_id: UserId) -> ClientResult<Vec<MedicalProfile>> {
        self.record("user_profiles")?;
        Ok(vec![empty_profile(user_id.0)])
    }

    async fn caregiver_patients(&self, _caregiver_id: UserId) -> ClientResult<Vec<User>> {
        self.record("caregiver_patients")?;
        Ok(vec![sample_user(21, Role::Patient), sample_user(22, Role::Patient)])
    }

    async fn dashboard_snapshot(&self) -> ClientResult<DashboardSnapshot> {
        self.record("dashboard_snapshot")?;
        Ok(DashboardSnapshot {
            timestamp: "2024-05-01T10:00:00Z".parse().expect("timestamp"),
            wearable: Default::default(),
            environment: Default::default(),
            metadata: Default::default(),
        })
    }

    async fn recommendations(&self) -> ClientResult<Vec<Recommendation>> {
        self.record("recommendations")?;
        Ok(Vec::new())
    }

    async fn summary(&self) -> ClientResult<SummaryData> {
        self.record("summary")?;
        Ok(SummaryData::default())
    }

    async fn chat_messages(&self, room_id: &str) -> ClientResult<Vec<ChatMessage>> {
        self.record("chat_messages")?;
        Ok(vec![ChatMessage {
            id: MessageId(1),
            room_id: room_id.to_string(),
            sender_id: UserId(9),
            sender_name: Some("Dr. Lee".to_string()),
            content: "How are you feeling?".to_string(),
            sent_at: "2024-05-01T10:00:00Z".parse().expect("timestamp"),
        }])
    }

    async fn update_settings(&self, _update: ProfileSettingsUpdate) -> ClientResult<AckResponse> {
        self.record("update_settings")?;
        Ok(AckResponse {
            success: true,
            message: Some("saved".to_string()),
        })
    }

    async fn pair_device(&self, request: PairDeviceRequest) -> ClientResult<DevicePairing> {
        self.record("pair_device")?;
        Ok(DevicePairing {
            device_id: format!("dev-{}", request.device_code),
            device_name: request.device_name,
            paired_at: "2024-05-01T10:00:00Z".parse().expect("timestamp"),
        })
    }

    async fn reset_password(&self, _request: ResetPasswordRequest) -> ClientResult<AckResponse> {
        self.record("reset_password")?;
        Ok(AckResponse {
            success: true,
            message: None,
        })
    }

    async fn send_chat_message(
        &self,
        room_id: &str,
        message: SendChatMessage,
    ) -> ClientResult<ChatMessage> {
        self.record("send_chat_message")?;
        Ok(ChatMessage {
            id: MessageId(2),
            room_id: room_id.to_string(),
            sender_id: self.user.id,
            sender_name: Some(self.user.full_name.clone()),
            content: message.content,
            sent_at: "2024-05-01T10:01:00Z".parse().expect("timestamp"),
        })
    }
}
