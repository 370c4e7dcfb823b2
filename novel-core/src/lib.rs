//! Shared identifiers, data model, error taxonomy, and ambient stack for the
//! gameplay-orchestration core.

pub mod config;
pub mod error;
pub mod ids;
pub mod messages;
pub mod model;
pub mod telemetry;

pub use error::{NovelError, NovelResult};
