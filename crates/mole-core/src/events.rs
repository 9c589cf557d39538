use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub const LOG_TOPIC: &str = "frp-logs";
pub const STATUS_TOPIC: &str = "frp-status";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
	Start,
	Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum Event {
	#[serde(rename = "frp-logs")]
	Logs(Vec<String>),
	#[serde(rename = "frp-status")]
	Status(StatusEvent),
}

impl Event {
	pub fn topic(&self) -> &'static str {
		match self {
			Event::Logs(_) => LOG_TOPIC,
			Event::Status(_) => STATUS_TOPIC,
		}
	}
}

/// Fire-and-forget outlet towards the UI.
pub trait EventSink: Send + Sync {
	fn publish(&self, event: Event);
}

#[derive(Clone)]
pub struct BroadcastSink {
	sender: broadcast::Sender<Event>,
}

impl BroadcastSink {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.sender.subscribe()
	}
}

impl Default for BroadcastSink {
	fn default() -> Self {
		Self::new()
	}
}

impl EventSink for BroadcastSink {
	fn publish(&self, event: Event) {
		// No listener attached is fine.
		let _ = self.sender.send(event);
	}
}
