//! RabbitMQ (AMQP 0-9-1) event sink.
//!
//! Publishes [`UserCreated`](crate::UserCreated) payloads to the
//! `routing-gateway` queue and consumes the same queue to log account
//! creations, deduplicated per process through a bounded
//! [`Deduplicator`](crate::dedup::Deduplicator).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use geogw_core::config::RabbitMqConfig;

use crate::dedup::Deduplicator;
use crate::{EventError, EventSink, UserCreated, ACCOUNT_CREATION_SUBJECT, ROUTING_KEY};

/// Broker-backed sink. One connection, one channel, publisher confirms off.
pub struct RabbitMqSink {
    channel: Channel,
    publish_timeout: Duration,
}

impl RabbitMqSink {
    /// Connect, declare the queue, and start the logging consumer.
    pub async fn connect(
        config: &RabbitMqConfig,
        publish_timeout: Duration,
    ) -> Result<Self, EventError> {
        let uri = format!(
            "amqp://{}:{}@{}:{}/{}",
            config.user,
            config.password,
            config.host,
            config.port,
            config.vhost.trim_start_matches('/'),
        );
        let options = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(&uri, options)
            .await
            .map_err(|e| EventError(e.to_string()))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| EventError(e.to_string()))?;
        channel
            .queue_declare(
                ROUTING_KEY,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventError(e.to_string()))?;

        let consumer_channel = connection
            .create_channel()
            .await
            .map_err(|e| EventError(e.to_string()))?;
        tokio::spawn(consume_account_creations(
            consumer_channel,
            Arc::new(Deduplicator::default()),
        ));

        Ok(RabbitMqSink {
            channel,
            publish_timeout,
        })
    }
}

#[async_trait]
impl EventSink for RabbitMqSink {
    async fn user_created(&self, event: &UserCreated) -> Result<(), EventError> {
        // Locally provisioned accounts (no provider) stay local.
        if event.provider_name.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_vec(event).map_err(|e| EventError(e.to_string()))?;
        let publish = self.channel.basic_publish(
            "",
            ROUTING_KEY,
            BasicPublishOptions::default(),
            &payload,
            BasicProperties::default().with_content_type("application/json".into()),
        );
        let _confirm = tokio::time::timeout(self.publish_timeout, publish)
            .await
            .map_err(|_| EventError("publish timed out".into()))?
            .map_err(|e| EventError(e.to_string()))?;
        Ok(())
    }
}

/// Consume the account-creation queue and log each account once.
async fn consume_account_creations(channel: Channel, dedup: Arc<Deduplicator>) {
    let mut consumer = match channel
        .basic_consume(
            ROUTING_KEY,
            "geogw-account-log",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
    {
        Ok(consumer) => consumer,
        Err(e) => {
            warn!(error = %e, "account-creation consumer failed to start");
            return;
        }
    };

    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "account-creation delivery failed");
                continue;
            }
        };
        if let Ok(event) = serde_json::from_slice::<UserCreated>(&delivery.data) {
            if event.subject == ACCOUNT_CREATION_SUBJECT && dedup.insert(&event.uid) {
                info!(
                    uid = %event.uid,
                    username = %event.local_uid,
                    provider = %event.provider_name,
                    "external account created"
                );
            }
        }
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            warn!(error = %e, "account-creation ack failed");
        }
    }
}
