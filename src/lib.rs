// Library Crate Root
// lib.rs

pub mod api;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod errors;
pub mod instruments;
pub mod jobs;
pub mod provider;
pub mod scheduler;
pub mod sync;

// pub use = re-export at crate root
pub use api::create_router;
pub use config::{AppConfig, ConfigError};
pub use dispatch::{DispatchReport, FetchDispatcher, FetchMode};
pub use errors::{PipelineError, PipelineFailure, PipelineStage};
pub use instruments::InstrumentRegistry;
pub use provider::{CandleProvider, ProviderResponse, UpstoxClient};
pub use scheduler::{ScheduledJob, Scheduler};
pub use sync::{SyncEngine, SyncReport};
