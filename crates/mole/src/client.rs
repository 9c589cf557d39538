use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

use mole_core::AppPaths;
use thiserror::Error;

use crate::protocol::{Request, Response};

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("daemon not running (start it with `mole daemon`)")]
	NotRunning,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("protocol error: {0}")]
	Protocol(#[from] serde_json::Error),
	#[error("daemon closed the connection")]
	Closed,
}

pub struct DaemonClient {
	stream: UnixStream,
}

impl DaemonClient {
	pub fn connect(paths: &AppPaths) -> Result<Self, ClientError> {
		let stream = UnixStream::connect(paths.socket_path()).map_err(|_| ClientError::NotRunning)?;
		Ok(Self { stream })
	}

	pub fn send(&mut self, request: &Request) -> Result<Response, ClientError> {
		self.write(request)?;

		let mut reader = BufReader::new(&self.stream);
		let mut line = String::new();
		if reader.read_line(&mut line)? == 0 {
			return Err(ClientError::Closed);
		}
		Ok(serde_json::from_str(&line)?)
	}

	/// Subscribes and hands every event to `on_event` until the daemon hangs up.
	pub fn watch<F: FnMut(mole_core::Event)>(mut self, mut on_event: F) -> Result<(), ClientError> {
		self.write(&Request::Subscribe)?;

		let reader = BufReader::new(&self.stream);
		for line in reader.lines() {
			match serde_json::from_str(&line?)? {
				Response::Event { event } => on_event(event),
				other => tracing::debug!("ignoring non-event response: {:?}", other),
			}
		}
		Ok(())
	}

	fn write(&mut self, request: &Request) -> Result<(), ClientError> {
		let mut data = serde_json::to_vec(request)?;
		data.push(b'\n');
		self.stream.write_all(&data)?;
		Ok(())
	}
}
