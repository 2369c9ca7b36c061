//! Snapcal — food-photo calorie estimation pipeline.
//!
//! An uploaded photo flows through: adaptive compression (EXIF-aware
//! reorientation + binary-search size targeting), an on-device food
//! pre-screen with a one-shot block override, a fingerprint-keyed result
//! cache, and finally the remote vision analysis client. See
//! `pipeline::orchestrator` for the decision policy.

pub mod config;
pub mod core_state;
pub mod db;
pub mod models;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedders that don't set up their own subscriber.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Snapcal pipeline v{}", config::APP_VERSION);
}
