use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version stamped on every save.
pub const CONFIG_VERSION: &str = "1.0.0";

/// Soft cap on proxy rules. The UI enforces it; the store keeps whatever it is given.
pub const MAX_PROXIES: usize = 3;

pub const DEFAULT_LOCAL_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
	#[serde(default)]
	pub config_version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_updated: Option<DateTime<Utc>>,
	#[serde(default)]
	pub server: ServerConfig,
	#[serde(default)]
	pub proxies: Vec<ProxyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
	pub addr: String,
	pub port: u16,
	#[serde(default)]
	pub token: String,
	#[serde(default)]
	pub remark: String,
	#[serde(default)]
	pub auto_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRule {
	pub id: String,
	#[serde(default)]
	pub enabled: bool,
	pub proxy_type: ProxyType,
	pub name: String,
	#[serde(rename = "localIP", default = "default_local_ip")]
	pub local_ip: String,
	pub local_port: u16,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_port: Option<u16>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub domains: Vec<String>,
}

fn default_local_ip() -> String {
	DEFAULT_LOCAL_IP.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
	Http,
	Tcp,
	Udp,
}

impl ProxyType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProxyType::Http => "http",
			ProxyType::Tcp => "tcp",
			ProxyType::Udp => "udp",
		}
	}
}

impl std::fmt::Display for ProxyType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.pad(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
	Unconfigured,
	Idle,
	Starting,
	Running,
	Stopping,
}

impl SupervisorState {
	pub fn is_running(&self) -> bool {
		matches!(self, SupervisorState::Running)
	}
}

/// Snapshot handed back to the UI by every synchronous entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
	pub success: bool,
	pub running: bool,
	pub config: Option<UserConfig>,
	pub message: String,
}

impl ServiceStatus {
	pub fn ok(running: bool, config: Option<UserConfig>, message: impl Into<String>) -> Self {
		Self { success: true, running, config, message: message.into() }
	}

	pub fn failed(running: bool, config: Option<UserConfig>, message: impl Into<String>) -> Self {
		Self { success: false, running, config, message: message.into() }
	}
}
