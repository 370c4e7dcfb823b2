//! Tracing setup shared by every binary embedding this workspace, mirroring
//! `he-api`'s `tracing-subscriber` initialization (fmt + env-filter).

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(true).init();
}
