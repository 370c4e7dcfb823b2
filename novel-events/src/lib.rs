//! Outbound publishing: generation/image task dispatch (C3) and
//! best-effort client status fan-out (C4).

pub mod client_updates;
pub mod tasks;

pub use client_updates::{notify_best_effort, ClientUpdatePublisher, RedisClientUpdatePublisher};
pub use tasks::{publish_all_best_effort, publish_image_tasks_best_effort, RedisTaskPublisher, TaskPublisher};
