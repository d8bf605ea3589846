//! Account-creation events.
//!
//! When the account manager provisions a user that came from an external
//! identity provider, a [`UserCreated`] event is published to the message
//! broker so the rest of the platform can react (welcome mail, moderation
//! queues, ...). The broker is reached through the [`EventSink`] trait; the
//! production implementation is [`rabbitmq::RabbitMqSink`], tests use
//! [`RecordingSink`].

pub mod dedup;
pub mod rabbitmq;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Routing key shared by producer and consumer.
pub const ROUTING_KEY: &str = "routing-gateway";

/// Subject discriminator inside the message payload.
pub const ACCOUNT_CREATION_SUBJECT: &str = "OAUTH2-ACCOUNT-CREATION";

/// Payload published when an externally-authenticated user is provisioned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    /// Stable account identifier.
    pub uid: String,
    /// Always [`ACCOUNT_CREATION_SUBJECT`].
    pub subject: String,
    pub full_name: String,
    /// Username in the directory.
    pub local_uid: String,
    pub email: String,
    pub organization: String,
    pub provider_name: String,
    pub provider_uid: String,
}

impl UserCreated {
    /// Build the event from a provisioned user record.
    pub fn for_user(user: &geogw_core::User) -> Self {
        UserCreated {
            uid: user.id.clone(),
            subject: ACCOUNT_CREATION_SUBJECT.to_string(),
            full_name: user.full_name(),
            local_uid: user.username.clone(),
            email: user.email.clone(),
            organization: user.organization.clone(),
            provider_name: user.external_provider.clone(),
            provider_uid: user.external_uid.clone(),
        }
    }
}

/// Error publishing to the broker.
#[derive(Debug)]
pub struct EventError(pub String);

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event publish error: {}", self.0)
    }
}

impl std::error::Error for EventError {}

/// Destination for account-creation events.
///
/// `user_created` is invoked by the account manager after a fully successful
/// provisioning sequence. Implementations must only publish events that
/// carry a provider name; locally created accounts stay local.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn user_created(&self, event: &UserCreated) -> Result<(), EventError>;
}

/// Sink that drops everything. Used when the broker is disabled.
#[derive(Default)]
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn user_created(&self, _event: &UserCreated) -> Result<(), EventError> {
        Ok(())
    }
}

/// Sink that records events in memory. Test double.
#[derive(Default)]
pub struct RecordingSink {
    events: tokio::sync::Mutex<Vec<UserCreated>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<UserCreated> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn user_created(&self, event: &UserCreated) -> Result<(), EventError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
