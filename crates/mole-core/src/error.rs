use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MoleError>;

#[derive(Debug, Error)]
pub enum MoleError {
	#[error("no user configuration saved yet")]
	NotConfigured,

	#[error("config file not found: {}", path.display())]
	NotFound { path: PathBuf },

	#[error("failed to parse {}: {source}", path.display())]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("failed to serialize config: {0}")]
	Format(#[from] toml::ser::Error),

	#[error("io error on {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("frpc executable unavailable at {}", path.display())]
	MissingExecutable { path: PathBuf },

	#[error("failed to spawn frpc: {0}")]
	Spawn(String),

	#[error("failed to stop frpc: {0}")]
	Kill(String),
}

impl MoleError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		MoleError::Io { path: path.into(), source }
	}
}
