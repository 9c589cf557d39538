//! # mole-core
//!
//! Supervises a single `frpc` tunnel subprocess for the mole desktop client.
//!
//! The user configuration is the source of truth; `frpc.toml` is regenerated
//! from it on every start. Subprocess output is captured line by line and
//! published in batches, and lifecycle changes go out as status events.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mole_core::{AppPaths, BroadcastSink, MoleService, PackagedExecutable, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let paths = AppPaths::new();
//! let sink = BroadcastSink::new();
//! let mut events = sink.subscribe();
//! let service = MoleService::new(
//! 	SupervisorConfig::new(paths),
//! 	Arc::new(PackagedExecutable::new("/usr/share/mole/resources")),
//! 	Arc::new(sink),
//! );
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! service.startup(shutdown_rx);
//!
//! let status = service.connect().await;
//! println!("{}", status.message);
//! while let Ok(event) = events.recv().await {
//! 	println!("{}: {:?}", event.topic(), event);
//! }
//! # }
//! ```

pub mod error;
pub mod events;
pub mod frpc;
pub mod gate;
pub mod output;
pub mod paths;
pub mod platform;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod types;

pub use error::{MoleError, Result};
pub use events::{BroadcastSink, Event, EventSink, StatusEvent};
pub use gate::InitGate;
pub use output::LogAggregator;
pub use paths::AppPaths;
pub use platform::{ExecutableSource, PackagedExecutable, ProcessControl, SystemProcessControl};
pub use service::MoleService;
pub use store::ConfigStore;
pub use supervisor::{StartOutcome, StopOutcome, Supervisor, SupervisorConfig};
pub use types::*;
