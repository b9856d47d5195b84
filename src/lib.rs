//! MammoDetect dashboard core.
//!
//! Session-aware async state orchestration for the diagnostic imaging
//! dashboard: one shared [`store::DashboardStore`] owned by three
//! controllers — [`session_manager::SessionManager`] resolves identity,
//! [`scan_controller::ScanSubmissionController`] drives one image
//! through analysis at a time, and [`history_cache::HistoryCache`]
//! keeps the local scan list consistent with the remote store.
//!
//! The rendering layer is deliberately absent: controllers mutate the
//! store, the store bumps a change counter, and whatever UI is attached
//! re-reads snapshots.

pub mod api;
pub mod auth;
pub mod config;
pub mod history_cache;
pub mod models;
pub mod scan_controller;
pub mod session_manager;
pub mod store;
pub mod supabase_auth;

use tracing_subscriber::EnvFilter;

/// Initialize tracing for host applications that have no subscriber of
/// their own. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} core v{}", config::APP_NAME, config::APP_VERSION);
}
