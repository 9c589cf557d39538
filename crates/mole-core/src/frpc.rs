//! Projection of [`UserConfig`] into the `frpc.toml` schema.
//!
//! Field names follow frpc's own configuration format and must not drift.

use std::path::Path;

use serde::Serialize;

use crate::error::{MoleError, Result};
use crate::store::write_atomic;
use crate::types::{ProxyRule, ProxyType, UserConfig, DEFAULT_LOCAL_IP};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrpcConfig {
	pub server_addr: String,
	pub server_port: u16,
	pub auth: FrpcAuth,
	pub proxies: Vec<FrpcProxy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrpcAuth {
	pub method: &'static str,
	pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FrpcProxy {
	Http(HttpProxy),
	TcpUdp(TcpUdpProxy),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxy {
	pub name: String,
	#[serde(rename = "type")]
	pub proxy_type: ProxyType,
	#[serde(rename = "localIP")]
	pub local_ip: String,
	pub local_port: u16,
	pub custom_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpUdpProxy {
	pub name: String,
	#[serde(rename = "type")]
	pub proxy_type: ProxyType,
	#[serde(rename = "localIP")]
	pub local_ip: String,
	pub local_port: u16,
	pub remote_port: u16,
}

impl FrpcProxy {
	pub fn name(&self) -> &str {
		match self {
			FrpcProxy::Http(p) => &p.name,
			FrpcProxy::TcpUdp(p) => &p.name,
		}
	}

	fn from_rule(rule: &ProxyRule) -> Self {
		let local_ip = if rule.local_ip.trim().is_empty() {
			DEFAULT_LOCAL_IP.to_string()
		} else {
			rule.local_ip.clone()
		};

		match rule.proxy_type {
			ProxyType::Http => FrpcProxy::Http(HttpProxy {
				name: rule.name.clone(),
				proxy_type: rule.proxy_type,
				local_ip,
				local_port: rule.local_port,
				custom_domains: rule.domains.clone(),
			}),
			ProxyType::Tcp | ProxyType::Udp => FrpcProxy::TcpUdp(TcpUdpProxy {
				name: rule.name.clone(),
				proxy_type: rule.proxy_type,
				local_ip,
				local_port: rule.local_port,
				remote_port: rule.remote_port.unwrap_or_default(),
			}),
		}
	}
}

/// Builds the runtime config. Disabled rules are dropped; order is preserved.
pub fn generate(cfg: Option<&UserConfig>) -> Result<FrpcConfig> {
	let cfg = cfg.ok_or(MoleError::NotConfigured)?;

	let proxies = cfg
		.proxies
		.iter()
		.filter(|rule| rule.enabled)
		.map(FrpcProxy::from_rule)
		.collect();

	Ok(FrpcConfig {
		server_addr: cfg.server.addr.clone(),
		server_port: cfg.server.port,
		auth: FrpcAuth {
			method: "token",
			token: cfg.server.token.clone(),
		},
		proxies,
	})
}

pub fn render(runtime: &FrpcConfig) -> Result<String> {
	Ok(toml::to_string_pretty(runtime)?)
}

/// Generates and writes the runtime config to `path`, replacing any previous file.
pub fn write(cfg: Option<&UserConfig>, path: &Path) -> Result<FrpcConfig> {
	let runtime = generate(cfg)?;
	let data = render(&runtime)?;
	write_atomic(path, data.as_bytes())?;
	tracing::debug!(
		"wrote {} with {} proxies",
		path.display(),
		runtime.proxies.len()
	);
	Ok(runtime)
}
