//! Synchronous status API and connect/disconnect wrappers for the UI shell.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{MoleError, Result};
use crate::events::EventSink;
use crate::gate::InitGate;
use crate::output::DEFAULT_FLUSH_INTERVAL;
use crate::platform::ExecutableSource;
use crate::store::ConfigStore;
use crate::supervisor::{StartOutcome, StopOutcome, Supervisor, SupervisorConfig};
use crate::types::{ServiceStatus, UserConfig};

pub struct MoleService {
	supervisor: Arc<Supervisor>,
	store: ConfigStore,
	gate: InitGate,
	flush_interval: Duration,
}

impl MoleService {
	pub fn new(
		config: SupervisorConfig,
		executable: Arc<dyn ExecutableSource>,
		sink: Arc<dyn EventSink>,
	) -> Arc<Self> {
		Self::with_flush_interval(config, executable, sink, DEFAULT_FLUSH_INTERVAL)
	}

	pub fn with_flush_interval(
		config: SupervisorConfig,
		executable: Arc<dyn ExecutableSource>,
		sink: Arc<dyn EventSink>,
		flush_interval: Duration,
	) -> Arc<Self> {
		let store = ConfigStore::new(config.paths.user_config_path());
		Arc::new(Self {
			supervisor: Supervisor::new(config, executable, sink),
			store,
			gate: InitGate::new(),
			flush_interval,
		})
	}

	pub fn supervisor(&self) -> &Arc<Supervisor> {
		&self.supervisor
	}

	/// Starts the process-wide log ticker and kicks off initialization
	/// (load, then auto-start if asked for). Status queries wait for it.
	pub fn startup(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
		self.supervisor.logs().start_ticker(self.flush_interval, shutdown);

		let service = Arc::clone(self);
		tokio::spawn(async move {
			let _guard = service.gate.open_on_drop();
			service.initialize().await;
		})
	}

	async fn initialize(&self) {
		match self.store.load() {
			Ok(config) => {
				tracing::info!("loaded user config from {}", self.store.path().display());
				self.supervisor.set_config(Some(config)).await;
			}
			Err(MoleError::NotFound { .. }) => {
				tracing::info!("no user config yet, waiting for one to be saved");
				return;
			}
			Err(e) => {
				tracing::error!("refusing to run with a broken config: {}", e);
				self.supervisor
					.logs()
					.notice(format!("failed to load config: {}", e))
					.await;
				return;
			}
		}

		let auto_start = self
			.supervisor
			.config()
			.await
			.is_some_and(|c| c.server.auto_start);
		if auto_start {
			tracing::info!("auto-start enabled, bringing the tunnel up");
			if let Err(e) = self.supervisor.start().await {
				tracing::warn!("auto-start failed: {}", e);
			}
		}
	}

	pub async fn get_status(&self) -> ServiceStatus {
		self.gate.wait().await;

		let (running, config) = self.supervisor.snapshot().await;
		let message = summary(running, config.is_some());
		ServiceStatus::ok(running, config, message)
	}

	/// Dispatches a start in the background; completion arrives as a
	/// `frp-status` event, not through this return value.
	pub async fn connect(self: &Arc<Self>) -> ServiceStatus {
		let config = self.supervisor.config().await;
		if config.is_none() {
			return ServiceStatus::failed(false, None, "not configured: save server settings first");
		}
		if self.supervisor.is_running() {
			return ServiceStatus::ok(true, config, "tunnel already running, request ignored");
		}

		let supervisor = Arc::clone(&self.supervisor);
		tokio::spawn(async move {
			match supervisor.start().await {
				Ok(StartOutcome::Started { .. }) => {}
				Ok(outcome) => tracing::debug!("connect ignored: {:?}", outcome),
				Err(e) => tracing::warn!("connect failed: {}", e),
			}
		});

		ServiceStatus::ok(false, config, "starting")
	}

	pub async fn disconnect(&self) -> ServiceStatus {
		let config = self.supervisor.config().await;
		match self.supervisor.stop().await {
			Ok(StopOutcome::AlreadyStopped) => ServiceStatus::ok(false, config, "already stopped"),
			Ok(StopOutcome::Stopped) => ServiceStatus::ok(false, config, "disconnected"),
			Err(e) => ServiceStatus::failed(self.supervisor.is_running(), config, e.to_string()),
		}
	}

	pub async fn reconnect(self: &Arc<Self>) -> ServiceStatus {
		let config = self.supervisor.config().await;
		if config.is_none() {
			return ServiceStatus::failed(false, None, "not configured: save server settings first");
		}
		match self.supervisor.restart().await {
			Ok(_) => ServiceStatus::ok(self.supervisor.is_running(), config, "reconnected"),
			Err(e) => ServiceStatus::failed(self.supervisor.is_running(), config, e.to_string()),
		}
	}

	/// Persists `cfg`, regenerates `frpc.toml`, and restarts a running tunnel so
	/// the new settings apply. Returns the stamped config.
	pub async fn save_user_config(self: &Arc<Self>, cfg: UserConfig) -> Result<UserConfig> {
		let stamped = self.store.save(&cfg)?;
		self.supervisor.set_config(Some(stamped.clone())).await;
		self.supervisor.write_runtime_config().await?;

		if self.supervisor.is_running() {
			tracing::info!("config changed while running, restarting frpc");
			self.supervisor.restart().await?;
		}
		Ok(stamped)
	}

	/// Tears the tunnel down on application exit.
	pub async fn shutdown(&self) {
		tracing::info!("cleaning up before exit");
		if let Err(e) = self.supervisor.stop().await {
			tracing::error!("failed to stop frpc on exit: {}", e);
		}
	}
}

fn summary(running: bool, configured: bool) -> &'static str {
	if running {
		"frpc is running"
	} else if configured {
		"frpc is idle"
	} else {
		"not configured yet"
	}
}
