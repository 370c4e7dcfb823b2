//! Client Update Publisher (C4, spec §6.3) — best-effort, fire-and-forget
//! fan-out of story/game-state status changes to end-user sockets, bounded
//! by a short timeout so a slow fan-out never blocks the caller (spec §5).

use std::time::Duration;

use async_trait::async_trait;
use novel_core::error::NovelError;
use novel_core::messages::ClientUpdate;
use tracing::{instrument, warn};

#[async_trait]
pub trait ClientUpdatePublisher: Send + Sync {
    async fn publish(&self, update: ClientUpdate) -> Result<(), NovelError>;
}

pub struct RedisClientUpdatePublisher {
    client: redis::Client,
    channel_prefix: String,
    timeout: Duration,
}

impl RedisClientUpdatePublisher {
    pub fn new(broker_url: &str, timeout: Duration) -> Result<Self, NovelError> {
        let client = redis::Client::open(broker_url)
            .map_err(|e| NovelError::ClientNotification(format!("failed to build redis client: {e}")))?;
        Ok(Self { client, channel_prefix: "novel:client_updates:".to_string(), timeout })
    }
}

#[async_trait]
impl ClientUpdatePublisher for RedisClientUpdatePublisher {
    #[instrument(skip(self, update))]
    async fn publish(&self, update: ClientUpdate) -> Result<(), NovelError> {
        let channel = format!("{}{}", self.channel_prefix, update.user_id);
        let payload = serde_json::to_string(&update)
            .map_err(|e| NovelError::ClientNotification(format!("failed to encode update: {e}")))?;

        let publish = async {
            let mut conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| NovelError::ClientNotification(format!("redis connection failed: {e}")))?;
            redis::AsyncCommands::publish::<_, _, ()>(&mut conn, &channel, payload)
                .await
                .map_err(|e| NovelError::ClientNotification(format!("redis publish failed: {e}")))
        };

        match tokio::time::timeout(self.timeout, publish).await {
            Ok(result) => result,
            Err(_) => Err(NovelError::ClientNotification(format!(
                "publish to {channel} timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

/// Best-effort send: log a warning on failure and swallow it, since
/// ClientNotification failures must never abort the caller's main flow
/// (spec §7, Property: "ClientNotification failures are warnings only").
pub async fn notify_best_effort(publisher: &dyn ClientUpdatePublisher, update: ClientUpdate) {
    if let Err(err) = publisher.publish(update).await {
        warn!(error = %err, "client notification failed; continuing without it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use novel_core::ids::UserId;

    mock! {
        Pub {}
        #[async_trait]
        impl ClientUpdatePublisher for Pub {
            async fn publish(&self, update: ClientUpdate) -> Result<(), NovelError>;
        }
    }

    #[tokio::test]
    async fn notify_best_effort_swallows_publish_failures() {
        let mut mock = MockPub::new();
        mock.expect_publish().returning(|_| Err(NovelError::ClientNotification("offline".into())));
        // Must not panic or propagate — this is the whole contract.
        notify_best_effort(&mock, ClientUpdate::story(UserId::new(), "ready")).await;
    }
}
