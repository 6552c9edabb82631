//! One binding per remote resource, all built on [`Query`] and [`Mutation`].

use std::{sync::Arc, time::Duration};

use shared::{
    domain::UserId,
    protocol::{
        AckResponse, ChatMessage, DashboardSnapshot, DevicePairing, MedicalProfile,
        PairDeviceRequest, ProfileSettingsUpdate, Recommendation, ResetPasswordRequest,
        SendChatMessage, SummaryData, User,
    },
};

use crate::{
    error::ClientError,
    mutation::Mutation,
    query::{Query, ResourceKey},
    HealthApi,
};

pub const WHOAMI: &str = "whoami";
pub const MEDICAL_PROFILE: &str = "medical-profile";
pub const USER_PROFILES: &str = "user-profiles";
pub const CAREGIVER_PATIENTS: &str = "caregiver-patients";
pub const DASHBOARD: &str = "dashboard";
pub const RECOMMENDATIONS: &str = "recommendations";
pub const SUMMARY: &str = "summary";
pub const CHAT_MESSAGES: &str = "chat-messages";

/// Caregiver-facing lists change rarely.
pub const DIRECTORY_STALE_TIME: Duration = Duration::from_secs(10 * 60);

pub fn whoami_query(api: &Arc<dyn HealthApi>) -> Query<User> {
    let api = Arc::clone(api);
    Query::new(ResourceKey::new(WHOAMI), move || {
        let api = Arc::clone(&api);
        async move { api.whoami().await }
    })
}

pub fn medical_profile_query(api: &Arc<dyn HealthApi>) -> Query<MedicalProfile> {
    let api = Arc::clone(api);
    Query::new(ResourceKey::new(MEDICAL_PROFILE), move || {
        let api = Arc::clone(&api);
        async move { api.medical_profile().await }
    })
}

/// Disabled until a non-zero `user_id` is supplied.
pub fn user_profiles_query(
    api: &Arc<dyn HealthApi>,
    user_id: UserId,
) -> Query<Vec<MedicalProfile>> {
    let api = Arc::clone(api);
    Query::new(
        ResourceKey::new(USER_PROFILES).with_param(user_id),
        move || {
            let api = Arc::clone(&api);
            async move { api.user_profiles(user_id).await }
        },
    )
    .enabled(user_id.is_set())
    .stale_time(DIRECTORY_STALE_TIME)
}

pub fn caregiver_patients_query(
    api: &Arc<dyn HealthApi>,
    caregiver_id: UserId,
) -> Query<Vec<User>> {
    let api = Arc::clone(api);
    Query::new(
        ResourceKey::new(CAREGIVER_PATIENTS).with_param(caregiver_id),
        move || {
            let api = Arc::clone(&api);
            async move { api.caregiver_patients(caregiver_id).await }
        },
    )
    .enabled(caregiver_id.is_set())
    .stale_time(DIRECTORY_STALE_TIME)
}

pub fn dashboard_query(api: &Arc<dyn HealthApi>) -> Query<DashboardSnapshot> {
    let api = Arc::clone(api);
    Query::new(ResourceKey::new(DASHBOARD), move || {
        let api = Arc::clone(&api);
        async move { api.dashboard_snapshot().await }
    })
}

pub fn recommendations_query(api: &Arc<dyn HealthApi>) -> Query<Vec<Recommendation>> {
    let api = Arc::clone(api);
    Query::new(ResourceKey::new(RECOMMENDATIONS), move || {
        let api = Arc::clone(&api);
        async move { api.recommendations().await }
    })
}

pub fn summary_query(api: &Arc<dyn HealthApi>) -> Query<SummaryData> {
    let api = Arc::clone(api);
    Query::new(ResourceKey::new(SUMMARY), move || {
        let api = Arc::clone(&api);
        async move { api.summary().await }
    })
}

pub fn chat_messages_query(api: &Arc<dyn HealthApi>, room_id: &str) -> Query<Vec<ChatMessage>> {
    let api = Arc::clone(api);
    let room = room_id.trim().to_string();
    let enabled = !room.is_empty();
    Query::new(
        ResourceKey::new(CHAT_MESSAGES).with_param(&room),
        move || {
            let api = Arc::clone(&api);
            let room = room.clone();
            async move { api.chat_messages(&room).await }
        },
    )
    .enabled(enabled)
}

pub fn update_settings_mutation(
    api: &Arc<dyn HealthApi>,
) -> Mutation<ProfileSettingsUpdate, AckResponse> {
    let api = Arc::clone(api);
    Mutation::new("update settings", move |update: ProfileSettingsUpdate| {
        let api = Arc::clone(&api);
        async move {
            if update.is_empty() {
                return Err(ClientError::PreconditionNotMet("no settings were changed"));
            }
            api.update_settings(update).await
        }
    })
    .invalidates(ResourceKey::new(MEDICAL_PROFILE))
    .invalidates(ResourceKey::new(USER_PROFILES))
    .invalidates(ResourceKey::new(WHOAMI))
}

pub fn pair_device_mutation(
    api: &Arc<dyn HealthApi>,
) -> Mutation<PairDeviceRequest, DevicePairing> {
    let api = Arc::clone(api);
    Mutation::new("device pairing", move |request: PairDeviceRequest| {
        let api = Arc::clone(&api);
        async move {
            if request.device_code.trim().is_empty() {
                return Err(ClientError::PreconditionNotMet("a device code is required"));
            }
            api.pair_device(request).await
        }
    })
    .invalidates(ResourceKey::new(DASHBOARD))
}

pub fn reset_password_mutation(
    api: &Arc<dyn HealthApi>,
) -> Mutation<ResetPasswordRequest, AckResponse> {
    let api = Arc::clone(api);
    Mutation::new("password change", move |request: ResetPasswordRequest| {
        let api = Arc::clone(&api);
        async move {
            if request.new_password.is_empty() {
                return Err(ClientError::PreconditionNotMet("a new password is required"));
            }
            api.reset_password(request).await
        }
    })
}

pub fn send_chat_message_mutation(
    api: &Arc<dyn HealthApi>,
    room_id: &str,
) -> Mutation<SendChatMessage, ChatMessage> {
    let api = Arc::clone(api);
    let room = room_id.trim().to_string();
    let key = ResourceKey::new(CHAT_MESSAGES).with_param(&room);
    Mutation::new("send message", move |message: SendChatMessage| {
        let api = Arc::clone(&api);
        let room = room.clone();
        async move {
            if room.is_empty() {
                return Err(ClientError::PreconditionNotMet("a chat room is required"));
            }
            if message.content.trim().is_empty() {
                return Err(ClientError::PreconditionNotMet("a message cannot be empty"));
            }
            api.send_chat_message(&room, message).await
        }
    })
    .invalidates(key)
}

#[cfg(test)]
#[path = "tests/resources_tests.rs"]
mod tests;
