use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};

use crate::error::{MoleError, Result};
use crate::events::{Event, EventSink, StatusEvent};
use crate::frpc;
use crate::output::LogAggregator;
use crate::paths::AppPaths;
use crate::platform::{self, ExecutableSource, ProcessControl, SystemProcessControl};
use crate::types::{SupervisorState, UserConfig};

const SPAWN_BUSY_RETRIES: u32 = 5;

pub struct SupervisorConfig {
	pub paths: AppPaths,
	pub control: Arc<dyn ProcessControl>,
}

impl SupervisorConfig {
	/// Uses [`SystemProcessControl`] to signal real OS processes.
	pub fn new(paths: AppPaths) -> Self {
		Self { paths, control: Arc::new(SystemProcessControl) }
	}
}

/// Owns the single frpc subprocess.
///
/// Three independent synchronization domains: `config` (shared/exclusive),
/// `process` (serializes start, stop and exit cleanup), and the log buffer
/// inside [`LogAggregator`]. `phase` mirrors the lifecycle for lock-free reads
/// and is only written while `process` is held.
pub struct Supervisor {
	config: RwLock<Option<UserConfig>>,
	process: Mutex<ProcessSlot>,
	phase: AtomicU8,
	next_run: AtomicU64,
	logs: LogAggregator,
	sink: Arc<dyn EventSink>,
	executable: Arc<dyn ExecutableSource>,
	control: Arc<dyn ProcessControl>,
	paths: AppPaths,
}

#[derive(Default)]
struct ProcessSlot {
	handle: Option<ProcessHandle>,
}

struct ProcessHandle {
	pid: u32,
	run: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
	Started { pid: u32 },
	AlreadyRunning,
	AlreadyStarting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
	Stopped,
	AlreadyStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Phase {
	Idle = 0,
	Starting = 1,
	Running = 2,
	Stopping = 3,
}

impl Phase {
	fn from_u8(v: u8) -> Self {
		match v {
			1 => Phase::Starting,
			2 => Phase::Running,
			3 => Phase::Stopping,
			_ => Phase::Idle,
		}
	}
}

impl Supervisor {
	pub fn new(
		config: SupervisorConfig,
		executable: Arc<dyn ExecutableSource>,
		sink: Arc<dyn EventSink>,
	) -> Arc<Self> {
		Arc::new(Self {
			config: RwLock::new(None),
			process: Mutex::new(ProcessSlot::default()),
			phase: AtomicU8::new(Phase::Idle as u8),
			next_run: AtomicU64::new(1),
			logs: LogAggregator::new(Arc::clone(&sink)),
			sink,
			executable,
			control: config.control,
			paths: config.paths,
		})
	}

	pub fn logs(&self) -> &LogAggregator {
		&self.logs
	}

	pub fn is_running(&self) -> bool {
		self.phase() == Phase::Running
	}

	pub async fn state(&self) -> SupervisorState {
		match self.phase() {
			Phase::Starting => SupervisorState::Starting,
			Phase::Running => SupervisorState::Running,
			Phase::Stopping => SupervisorState::Stopping,
			Phase::Idle => {
				if self.config.read().await.is_some() {
					SupervisorState::Idle
				} else {
					SupervisorState::Unconfigured
				}
			}
		}
	}

	pub async fn config(&self) -> Option<UserConfig> {
		self.config.read().await.clone()
	}

	pub async fn set_config(&self, config: Option<UserConfig>) {
		*self.config.write().await = config;
	}

	/// Running flag and config read together under shared access.
	pub async fn snapshot(&self) -> (bool, Option<UserConfig>) {
		let config = self.config.read().await;
		(self.is_running(), config.clone())
	}

	/// Regenerates `frpc.toml` from the current user config. Serialized with
	/// `start`, which writes the same file.
	pub async fn write_runtime_config(&self) -> Result<()> {
		let _slot = self.process.lock().await;
		let config = self.config.read().await;
		frpc::write(config.as_ref(), &self.paths.runtime_config_path())?;
		Ok(())
	}

	pub async fn start(self: &Arc<Self>) -> Result<StartOutcome> {
		if let Some(outcome) = self.busy_outcome() {
			return Ok(outcome);
		}

		let mut slot = self.process.lock().await;
		if let Some(outcome) = self.busy_outcome() {
			return Ok(outcome);
		}

		let config = self.config.read().await.clone();
		let Some(config) = config else {
			return Err(MoleError::NotConfigured);
		};

		// A handle only exists while Running or Stopping.
		debug_assert!(slot.handle.is_none());
		self.set_phase(Phase::Starting);

		let mut child = match self.spawn_frpc(&config).await {
			Ok(child) => child,
			Err(e) => {
				self.set_phase(Phase::Idle);
				tracing::error!("{}", e);
				self.logs.notice(format!("frpc failed to start: {}", e)).await;
				return Err(e);
			}
		};

		let Some(pid) = child.id() else {
			self.set_phase(Phase::Idle);
			let e = MoleError::Spawn("frpc exited before its pid was read".into());
			self.logs.notice(e.to_string()).await;
			return Err(e);
		};

		if let Some(stdout) = child.stdout.take() {
			self.logs.attach(stdout, "stdout");
		}
		if let Some(stderr) = child.stderr.take() {
			self.logs.attach(stderr, "stderr");
		}

		let run = self.next_run.fetch_add(1, Ordering::SeqCst);
		slot.handle = Some(ProcessHandle { pid, run });
		self.set_phase(Phase::Running);
		self.sink.publish(Event::Status(StatusEvent::Start));
		tracing::info!(
			"frpc started (pid {}, config {})",
			pid,
			self.paths.runtime_config_path().display()
		);

		let supervisor = Arc::clone(self);
		tokio::spawn(async move {
			let status = child.wait().await;
			supervisor.on_exit(run, status).await;
		});

		Ok(StartOutcome::Started { pid })
	}

	pub async fn stop(&self) -> Result<StopOutcome> {
		self.stop_with_notice("disconnected by user").await
	}

	async fn stop_with_notice(&self, notice: &str) -> Result<StopOutcome> {
		let mut slot = self.process.lock().await;
		let pid = match (&slot.handle, self.phase()) {
			(Some(handle), Phase::Running) => handle.pid,
			_ => return Ok(StopOutcome::AlreadyStopped),
		};

		self.set_phase(Phase::Stopping);
		if let Err(e) = self.control.kill_tree(pid) {
			self.set_phase(Phase::Running);
			tracing::error!("{}", e);
			self.logs.notice(e.to_string()).await;
			return Err(e);
		}

		slot.handle = None;
		self.set_phase(Phase::Idle);
		tracing::info!("frpc stopped (pid {})", pid);
		self.logs.notice(notice).await;
		self.sink.publish(Event::Status(StatusEvent::Stop));
		Ok(StopOutcome::Stopped)
	}

	/// Stops a running instance, then starts again with the current config.
	pub async fn restart(self: &Arc<Self>) -> Result<StartOutcome> {
		self.stop_with_notice("restarting frpc").await?;
		self.start().await
	}

	async fn spawn_frpc(&self, config: &UserConfig) -> Result<Child> {
		let exe = platform::ensure_executable(self.executable.as_ref(), &self.paths.bin_dir())?;
		let runtime_path = self.paths.runtime_config_path();
		frpc::write(Some(config), &runtime_path)?;

		let mut cmd = Command::new(&exe);
		cmd.arg("-c")
			.arg(&runtime_path)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		platform::hide_console(&mut cmd);

		let mut attempts = 0;
		loop {
			match cmd.spawn() {
				Ok(child) => return Ok(child),
				Err(e) if platform::is_text_busy(&e) && attempts < SPAWN_BUSY_RETRIES => {
					attempts += 1;
					tokio::time::sleep(Duration::from_millis(20)).await;
				}
				Err(e) => return Err(MoleError::Spawn(format!("{}: {}", exe.display(), e))),
			}
		}
	}

	/// Runs when the waiter sees the child exit. Cleanup only happens if the
	/// handle still belongs to this run; an explicit stop may have beaten us.
	async fn on_exit(&self, run: u64, status: io::Result<ExitStatus>) {
		let mut slot = self.process.lock().await;
		let ours = slot.handle.as_ref().map(|h| h.run) == Some(run);
		if !ours {
			tracing::debug!("frpc run {} already cleaned up", run);
			return;
		}

		slot.handle = None;
		self.set_phase(Phase::Idle);

		let message = match status {
			Ok(status) => format!("frpc exited ({})", status),
			Err(e) => format!("frpc wait failed: {}", e),
		};
		tracing::warn!("{}", message);
		self.logs.notice(message).await;
		self.sink.publish(Event::Status(StatusEvent::Stop));
	}

	fn busy_outcome(&self) -> Option<StartOutcome> {
		match self.phase() {
			Phase::Running => Some(StartOutcome::AlreadyRunning),
			Phase::Starting => Some(StartOutcome::AlreadyStarting),
			_ => None,
		}
	}

	fn phase(&self) -> Phase {
		Phase::from_u8(self.phase.load(Ordering::SeqCst))
	}

	fn set_phase(&self, phase: Phase) {
		self.phase.store(phase as u8, Ordering::SeqCst);
	}
}
