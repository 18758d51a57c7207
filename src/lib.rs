//! Yardwatch Library
//!
//! Camera motion to animal detection to deterrent coordination core
//!
//! ## Architecture
//!
//! 1. EventBus - Camera pub/sub (motion, snapshot request/image)
//! 2. SnapshotCache - Latest image per camera
//! 3. PollingOrchestrator - Periodic snapshot coverage
//! 4. DispatchQueue - Strict priority (motion before periodic)
//! 5. WorkerPool - Detect, actuate, save, log per work item
//! 6. Detection - Inference dispatch and thresholding
//! 7. Actuation - Cooldown-gated deterrent control
//! 8. SettingsSync - Atomically swapped operator settings
//! 9. EventLogService - One record per work item
//! 10. SnapshotStore - Snapshot files and retention sweep
//! 11. WebAPI - Status endpoints
//!
//! ## Shared state
//!
//! Components coordinate only through the queue, the snapshot cache,
//! the settings handle and the cooldown gate, all passed in at
//! construction time.

pub mod actuation;
pub mod ai_client;
pub mod clock;
pub mod detection;
pub mod dispatch_queue;
pub mod error;
pub mod event_bus;
pub mod event_log_service;
pub mod polling_orchestrator;
pub mod settings_sync;
pub mod snapshot_cache;
pub mod snapshot_store;
pub mod state;
pub mod web_api;
pub mod worker_pool;

pub use error::{Error, Result};
pub use state::AppState;
