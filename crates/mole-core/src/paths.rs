use std::path::PathBuf;

pub const APP_NAME: &str = "mole";

#[derive(Debug, Clone)]
pub struct AppPaths {
	root: PathBuf,
}

impl AppPaths {
	/// Resolves the per-user root: `$XDG_CONFIG_HOME/mole`, then `~/.config/mole`.
	pub fn new() -> Self {
		let root = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
			PathBuf::from(dir).join(APP_NAME)
		} else if let Some(home) = home_dir() {
			home.join(".config").join(APP_NAME)
		} else {
			PathBuf::from("/tmp").join(APP_NAME)
		};
		Self { root }
	}

	pub fn with_root(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn config_dir(&self) -> PathBuf {
		self.root.join("config")
	}

	pub fn bin_dir(&self) -> PathBuf {
		self.root.join("bin")
	}

	pub fn state_dir(&self) -> PathBuf {
		self.root.join("state")
	}

	pub fn user_config_path(&self) -> PathBuf {
		self.config_dir().join("config.toml")
	}

	pub fn settings_path(&self) -> PathBuf {
		self.config_dir().join("settings.toml")
	}

	pub fn runtime_config_path(&self) -> PathBuf {
		self.bin_dir().join("frpc.toml")
	}

	pub fn socket_path(&self) -> PathBuf {
		self.state_dir().join("daemon.sock")
	}

	pub fn pid_path(&self) -> PathBuf {
		self.state_dir().join("daemon.pid")
	}
}

impl Default for AppPaths {
	fn default() -> Self {
		Self::new()
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}
