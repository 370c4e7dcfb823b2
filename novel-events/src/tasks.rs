//! Task Publisher (C3, spec §6.1) — outbound queue for generation tasks
//! and image tasks. At-least-once delivery; image tasks may be published
//! individually or batched.

use async_trait::async_trait;
use novel_core::error::NovelError;
use novel_core::messages::{GenerationTask, ImageTask, ImageTaskBatch};
use tracing::{instrument, warn};

/// Mirrors `he-events::publisher::EventPublisher`'s shape: a single-item
/// publish plus a default batch publish built on top of it.
#[async_trait]
pub trait TaskPublisher: Send + Sync {
    async fn publish_generation_task(&self, task: &GenerationTask) -> Result<(), NovelError>;

    async fn publish_image_task(&self, task: &ImageTask) -> Result<(), NovelError>;

    /// Default batch publish: one broker message carrying every task. An
    /// implementation with native batch support should override this.
    async fn publish_image_batch(&self, batch: &ImageTaskBatch) -> Result<(), NovelError> {
        for task in &batch.tasks {
            self.publish_image_task(task).await?;
        }
        Ok(())
    }
}

/// Redis-list-backed publisher: `RPUSH` onto a queue key per prompt
/// category, read by the generation workers on the other side. At-least-
/// once because a crash between `RPUSH` and the worker's ack simply means
/// the worker re-delivers.
pub struct RedisTaskPublisher {
    client: redis::Client,
    generation_queue_key: String,
    image_queue_key: String,
}

impl RedisTaskPublisher {
    pub fn new(broker_url: &str) -> Result<Self, NovelError> {
        let client = redis::Client::open(broker_url)
            .map_err(|e| NovelError::Generation(format!("failed to build redis client: {e}")))?;
        Ok(Self {
            client,
            generation_queue_key: "novel:generation_tasks".to_string(),
            image_queue_key: "novel:image_tasks".to_string(),
        })
    }

    async fn push(&self, key: &str, payload: &str) -> Result<(), NovelError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| NovelError::Generation(format!("redis connection failed: {e}")))?;
        redis::AsyncCommands::rpush::<_, _, ()>(&mut conn, key, payload)
            .await
            .map_err(|e| NovelError::Generation(format!("redis rpush failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl TaskPublisher for RedisTaskPublisher {
    #[instrument(skip(self, task))]
    async fn publish_generation_task(&self, task: &GenerationTask) -> Result<(), NovelError> {
        let payload = serde_json::to_string(task)
            .map_err(|e| NovelError::Generation(format!("failed to encode task: {e}")))?;
        self.push(&self.generation_queue_key, &payload).await
    }

    #[instrument(skip(self, task))]
    async fn publish_image_task(&self, task: &ImageTask) -> Result<(), NovelError> {
        let payload = serde_json::to_string(task)
            .map_err(|e| NovelError::Generation(format!("failed to encode image task: {e}")))?;
        self.push(&self.image_queue_key, &payload).await
    }

    #[instrument(skip(self, batch))]
    async fn publish_image_batch(&self, batch: &ImageTaskBatch) -> Result<(), NovelError> {
        let payload = serde_json::to_string(batch)
            .map_err(|e| NovelError::Generation(format!("failed to encode image batch: {e}")))?;
        self.push(&self.image_queue_key, &payload).await
    }
}

/// Publish every task in `tasks`, collecting the first error but never
/// aborting the remaining publishes (spec §4.3: "partial-publish failures
/// collect the first error but do not abort remaining publishes"). Every
/// retry publish goes through this, single-task retries included, so a
/// retry endpoint always learns about a failed enqueue the same way.
pub async fn publish_all_best_effort(
    publisher: &dyn TaskPublisher,
    tasks: &[GenerationTask],
) -> Result<(), NovelError> {
    let mut first_error = None;
    for task in tasks {
        if let Err(err) = publisher.publish_generation_task(task).await {
            warn!(task_id = %task.task_id, error = %err, "task publish failed during fan-out");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Publish every image task in `batch` individually, collecting the first
/// error but never aborting the remaining publishes — the same discipline
/// as `publish_all_best_effort`, for image-task retries (spec §4.3) that
/// need per-task delivery instead of `TaskPublisher::publish_image_batch`'s
/// single bundled broker message.
pub async fn publish_image_tasks_best_effort(
    publisher: &dyn TaskPublisher,
    batch: &ImageTaskBatch,
) -> Result<(), NovelError> {
    let mut first_error = None;
    for task in &batch.tasks {
        if let Err(err) = publisher.publish_image_task(task).await {
            warn!(task_id = %task.task_id, error = %err, "image task publish failed during fan-out");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use novel_core::ids::{CharacterId, StoryId, TaskId, UserId};
    use novel_core::model::{ImageRatio, PromptType};

    mock! {
        Pub {}
        #[async_trait]
        impl TaskPublisher for Pub {
            async fn publish_generation_task(&self, task: &GenerationTask) -> Result<(), NovelError>;
            async fn publish_image_task(&self, task: &ImageTask) -> Result<(), NovelError>;
        }
    }

    fn task() -> GenerationTask {
        GenerationTask::new(
            UserId::new(),
            StoryId::new(),
            PromptType::CharacterGeneration,
            "prompt".into(),
            "en".into(),
        )
    }

    #[tokio::test]
    async fn fan_out_keeps_publishing_after_a_failure_and_reports_the_first_error() {
        let mut mock = MockPub::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_publish_generation_task()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(NovelError::Generation("broker down".into())));
        mock.expect_publish_generation_task()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let tasks = vec![task(), task()];
        let result = publish_all_best_effort(&mock, &tasks).await;
        assert!(matches!(result, Err(NovelError::Generation(_))));
    }

    #[tokio::test]
    async fn fan_out_succeeds_when_every_publish_succeeds() {
        let mut mock = MockPub::new();
        mock.expect_publish_generation_task().times(2).returning(|_| Ok(()));
        let tasks = vec![task(), task()];
        assert!(publish_all_best_effort(&mock, &tasks).await.is_ok());
    }

    fn image_task() -> ImageTask {
        ImageTask {
            task_id: TaskId::new(),
            user_id: UserId::new(),
            published_story_id: StoryId::new(),
            character_id: Some(CharacterId::new()),
            character_name: "guard".into(),
            image_reference: "ref".into(),
            prompt: "a guard".into(),
            negative_prompt: "".into(),
            ratio: ImageRatio::Portrait,
        }
    }

    #[tokio::test]
    async fn image_fan_out_keeps_publishing_after_a_failure_and_reports_the_first_error() {
        let mut mock = MockPub::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_publish_image_task()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(NovelError::Generation("broker down".into())));
        mock.expect_publish_image_task().times(1).in_sequence(&mut seq).returning(|_| Ok(()));

        let batch = ImageTaskBatch::new(vec![image_task(), image_task()]);
        let result = publish_image_tasks_best_effort(&mock, &batch).await;
        assert!(matches!(result, Err(NovelError::Generation(_))));
    }
}
