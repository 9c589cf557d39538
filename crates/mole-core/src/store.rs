use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{MoleError, Result};
use crate::types::{UserConfig, CONFIG_VERSION};

/// Durable home of the user configuration.
#[derive(Debug, Clone)]
pub struct ConfigStore {
	path: PathBuf,
}

impl ConfigStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Reads the persisted config. A missing file is `NotFound`; a malformed one
	/// is `Parse` and must not be papered over with defaults.
	pub fn load(&self) -> Result<UserConfig> {
		let content = match fs::read_to_string(&self.path) {
			Ok(c) => c,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(MoleError::NotFound { path: self.path.clone() });
			}
			Err(e) => return Err(MoleError::io(&self.path, e)),
		};
		toml::from_str(&content).map_err(|source| MoleError::Parse {
			path: self.path.clone(),
			source,
		})
	}

	/// Stamps version metadata onto `cfg` and persists it. Returns the stamped copy.
	pub fn save(&self, cfg: &UserConfig) -> Result<UserConfig> {
		let mut stamped = cfg.clone();
		stamped.config_version = CONFIG_VERSION.to_string();
		stamped.last_updated = Some(Utc::now());

		let data = toml::to_string_pretty(&stamped)?;
		write_atomic(&self.path, data.as_bytes())?;
		tracing::info!("saved user config to {}", self.path.display());
		Ok(stamped)
	}
}

/// Writes to a sibling temp file and renames over `path`, so a crash mid-write
/// leaves the previous file intact.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
	write_atomic_with_mode(path, data, None)
}

/// Like [`write_atomic`], but applies `mode` (unix permission bits) to the temp
/// file before the rename, so `path` never appears with the wrong mode.
pub(crate) fn write_atomic_with_mode(path: &Path, data: &[u8], mode: Option<u32>) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).map_err(|e| MoleError::io(parent, e))?;
	}

	let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
	tmp_name.push(".tmp");
	let tmp_path = path.with_file_name(tmp_name);

	let mut file = fs::File::create(&tmp_path).map_err(|e| MoleError::io(&tmp_path, e))?;
	file.write_all(data).map_err(|e| MoleError::io(&tmp_path, e))?;
	file.sync_all().map_err(|e| MoleError::io(&tmp_path, e))?;
	drop(file);

	#[cfg(unix)]
	if let Some(mode) = mode {
		use std::os::unix::fs::PermissionsExt;
		fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))
			.map_err(|e| MoleError::io(&tmp_path, e))?;
	}
	#[cfg(not(unix))]
	let _ = mode;

	fs::rename(&tmp_path, path).map_err(|e| MoleError::io(path, e))
}
