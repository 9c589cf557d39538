use mole_core::AppPaths;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

// ── Daemon settings (<config_dir>/settings.toml) ────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
	#[serde(default)]
	pub logs: LogsSettings,
	#[serde(default)]
	pub frpc: FrpcSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsSettings {
	#[serde(default = "default_flush_interval_ms")]
	pub flush_interval_ms: u64,
}

impl Default for LogsSettings {
	fn default() -> Self {
		Self { flush_interval_ms: default_flush_interval_ms() }
	}
}

impl LogsSettings {
	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms.max(1))
	}
}

fn default_flush_interval_ms() -> u64 { 500 }

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FrpcSettings {
	/// Directory holding the packaged `frpc_<os>_<arch>` binaries.
	pub resource_dir: Option<String>,
}

impl FrpcSettings {
	pub fn resource_dir(&self) -> PathBuf {
		if let Some(dir) = &self.resource_dir {
			return expand_tilde(dir);
		}
		std::env::current_exe()
			.ok()
			.and_then(|exe| exe.parent().map(|p| p.join("resources")))
			.unwrap_or_else(|| PathBuf::from("resources"))
	}
}

/// Shell settings are optional; anything unreadable falls back to defaults.
pub fn load_settings(paths: &AppPaths) -> Settings {
	let path = paths.settings_path();
	if path.exists() {
		match std::fs::read_to_string(&path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(settings) => return settings,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	Settings::default()
}

fn expand_tilde(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~/") {
		if let Ok(home) = std::env::var("HOME") {
			return PathBuf::from(home).join(rest);
		}
	}
	PathBuf::from(path)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_when_file_missing() {
		let dir = tempfile::tempdir().unwrap();
		let settings = load_settings(&AppPaths::with_root(dir.path()));
		assert_eq!(settings.logs.flush_interval(), Duration::from_millis(500));
		assert!(settings.frpc.resource_dir.is_none());
	}

	#[test]
	fn reads_overrides() {
		let dir = tempfile::tempdir().unwrap();
		let paths = AppPaths::with_root(dir.path());
		std::fs::create_dir_all(paths.config_dir()).unwrap();
		std::fs::write(
			paths.settings_path(),
			"[logs]\nflush_interval_ms = 250\n\n[frpc]\nresource_dir = \"/opt/mole/res\"\n",
		)
		.unwrap();

		let settings = load_settings(&paths);
		assert_eq!(settings.logs.flush_interval(), Duration::from_millis(250));
		assert_eq!(settings.frpc.resource_dir(), PathBuf::from("/opt/mole/res"));
	}

	#[test]
	fn garbage_falls_back_to_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let paths = AppPaths::with_root(dir.path());
		std::fs::create_dir_all(paths.config_dir()).unwrap();
		std::fs::write(paths.settings_path(), "logs = 3 = 4").unwrap();
		assert_eq!(load_settings(&paths).logs.flush_interval_ms, 500);
	}
}
