//! Per-platform capabilities: where the frpc binary comes from, how it is
//! spawned without a console, and how its process tree is torn down.

use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{MoleError, Result};
use crate::store::write_atomic_with_mode;

pub const EXECUTABLE_NAME: &str = if cfg!(windows) { "frpc.exe" } else { "frpc" };

/// Supplies the frpc bytes for the running platform.
pub trait ExecutableSource: Send + Sync {
	fn file_name(&self) -> &str {
		EXECUTABLE_NAME
	}

	fn executable_bytes(&self) -> io::Result<Vec<u8>>;
}

/// Reads `frpc_<os>_<arch>` out of the directory the installer ships resources in.
#[derive(Debug, Clone)]
pub struct PackagedExecutable {
	pub resource_dir: PathBuf,
}

impl PackagedExecutable {
	pub fn new(resource_dir: impl Into<PathBuf>) -> Self {
		Self { resource_dir: resource_dir.into() }
	}

	pub fn resource_path(&self) -> PathBuf {
		self.resource_dir.join(packaged_name())
	}
}

impl ExecutableSource for PackagedExecutable {
	fn executable_bytes(&self) -> io::Result<Vec<u8>> {
		std::fs::read(self.resource_path())
	}
}

pub fn packaged_name() -> String {
	let os = match std::env::consts::OS {
		"macos" => "darwin",
		other => other,
	};
	let arch = match std::env::consts::ARCH {
		"x86_64" => "amd64",
		"aarch64" => "arm64",
		"x86" => "386",
		other => other,
	};
	let suffix = if cfg!(windows) { ".exe" } else { "" };
	format!("frpc_{}_{}{}", os, arch, suffix)
}

/// Places the executable under `bin_dir` unless it is already there. An
/// existing file that lost its execute bits gets them back.
pub fn ensure_executable(source: &dyn ExecutableSource, bin_dir: &Path) -> Result<PathBuf> {
	let target = bin_dir.join(source.file_name());
	if target.exists() {
		restore_execute_bits(&target)?;
		return Ok(target);
	}

	let bytes = source.executable_bytes().map_err(|e| {
		tracing::warn!("no packaged frpc for this platform: {}", e);
		MoleError::MissingExecutable { path: target.clone() }
	})?;
	write_atomic_with_mode(&target, &bytes, Some(0o755))?;

	tracing::info!("materialized frpc at {}", target.display());
	Ok(target)
}

#[cfg(unix)]
fn restore_execute_bits(target: &Path) -> Result<()> {
	use std::os::unix::fs::PermissionsExt;

	let mode = std::fs::metadata(target)
		.map_err(|e| MoleError::io(target, e))?
		.permissions()
		.mode();
	if mode & 0o111 == 0o111 {
		return Ok(());
	}

	tracing::warn!("{} is not executable (mode {:o}), fixing", target.display(), mode & 0o777);
	std::fs::set_permissions(target, std::fs::Permissions::from_mode(mode | 0o755))
		.map_err(|e| MoleError::io(target, e))
}

#[cfg(not(unix))]
fn restore_execute_bits(_target: &Path) -> Result<()> {
	Ok(())
}

/// Keeps the child invisible: no console window on Windows, and its own
/// process group on Unix so `kill_tree` reaches every descendant.
pub fn hide_console(cmd: &mut Command) {
	#[cfg(windows)]
	{
		const CREATE_NO_WINDOW: u32 = 0x0800_0000;
		cmd.creation_flags(CREATE_NO_WINDOW);
	}

	#[cfg(unix)]
	{
		cmd.process_group(0);
	}
}

/// A just-written executable can briefly stay open in a concurrently forked
/// child, which makes exec fail with ETXTBSY until that child execs.
pub fn is_text_busy(err: &io::Error) -> bool {
	#[cfg(unix)]
	{
		err.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
	}

	#[cfg(not(unix))]
	{
		let _ = err;
		false
	}
}

/// Tears down a spawned frpc together with everything it started.
pub trait ProcessControl: Send + Sync {
	/// One forceful attempt. An error means the process may still be alive.
	fn kill_tree(&self, pid: u32) -> Result<()>;
}

/// Signals the real OS process tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessControl;

impl ProcessControl for SystemProcessControl {
	fn kill_tree(&self, pid: u32) -> Result<()> {
		kill_tree(pid)
	}
}

/// Forcefully terminates `pid` and its descendants. One attempt, no retry.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> Result<()> {
	use nix::errno::Errno;
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;

	match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
		Ok(()) => Ok(()),
		// Already gone; the exit waiter will settle the state.
		Err(Errno::ESRCH) => Ok(()),
		Err(e) => Err(MoleError::Kill(format!("killpg {}: {}", pid, e))),
	}
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) -> Result<()> {
	use std::os::windows::process::CommandExt;
	const CREATE_NO_WINDOW: u32 = 0x0800_0000;

	let status = std::process::Command::new("taskkill")
		.args(["/F", "/T", "/PID", &pid.to_string()])
		.creation_flags(CREATE_NO_WINDOW)
		.status()
		.map_err(|e| MoleError::Kill(format!("taskkill {}: {}", pid, e)))?;
	if status.success() {
		Ok(())
	} else {
		Err(MoleError::Kill(format!("taskkill {} exited with {}", pid, status)))
	}
}
