use mole_core::{Event, ServiceStatus, UserConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
	Status,
	Connect,
	Disconnect,
	Reconnect,
	Save { config: UserConfig },
	/// Turns the connection into a one-way event stream.
	Subscribe,
	Ping,
	Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
	Status { status: ServiceStatus },
	Ok { message: Option<String> },
	Error { message: String },
	Event { event: Event },
	Pong,
}
