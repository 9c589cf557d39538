mod client;
mod config;
mod daemon;
mod protocol;

use std::path::Path;

use client::DaemonClient;
use mole_core::{AppPaths, Event, ServiceStatus, StatusEvent, UserConfig};
use owo_colors::OwoColorize;
use protocol::{Request, Response};

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("mole {}", env!("CARGO_PKG_VERSION")),
		"daemon" => cmd_daemon(),
		"status" | "st" => cmd_status(),
		"connect" | "up" => cmd_status_request(Request::Connect),
		"disconnect" | "down" => cmd_status_request(Request::Disconnect),
		"reconnect" => cmd_status_request(Request::Reconnect),
		"save" => cmd_save(&args[1..]),
		"watch" => cmd_watch(),
		"shutdown" => cmd_shutdown(),
		other => {
			eprintln!("unknown command: {}", other);
			print_usage();
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("mole - frpc tunnel supervisor");
	eprintln!();
	eprintln!("usage: mole <command>");
	eprintln!();
	eprintln!("  daemon              run the supervisor in the foreground");
	eprintln!("  status              show tunnel status and configuration");
	eprintln!("  connect             start the tunnel");
	eprintln!("  disconnect          stop the tunnel");
	eprintln!("  reconnect           restart the tunnel with the saved config");
	eprintln!("  save <config.toml>  save a user config and regenerate frpc.toml");
	eprintln!("  watch               stream frpc logs and status changes");
	eprintln!("  shutdown            stop the tunnel and the daemon");
}

fn init_tracing() {
	let filter = tracing_subscriber::EnvFilter::try_from_env("MOLE_LOG")
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cmd_daemon() {
	init_tracing();
	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("error: failed to start runtime: {}", e);
			std::process::exit(1);
		}
	};
	runtime.block_on(daemon::run(AppPaths::new()));
}

fn client() -> DaemonClient {
	match DaemonClient::connect(&AppPaths::new()) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	}
}

fn send(request: Request) -> Response {
	match client().send(&request) {
		Ok(r) => r,
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	}
}

fn cmd_status() {
	match send(Request::Status) {
		Response::Status { status } => {
			render_status(&status);
			if let Some(config) = &status.config {
				render_config(config);
			}
		}
		other => exit_on_unexpected(other),
	}
}

fn cmd_status_request(request: Request) {
	match send(request) {
		Response::Status { status } => {
			render_status(&status);
			if !status.success {
				std::process::exit(1);
			}
		}
		other => exit_on_unexpected(other),
	}
}

fn cmd_save(args: &[String]) {
	let Some(file) = args.first() else {
		eprintln!("usage: mole save <config.toml>");
		std::process::exit(1);
	};

	let config = match read_user_config(Path::new(file)) {
		Ok(c) => c,
		Err(e) => {
			eprintln!("error: {}", e);
			std::process::exit(1);
		}
	};
	if config.proxies.len() > mole_core::MAX_PROXIES {
		eprintln!(
			"error: at most {} proxies are supported, got {}",
			mole_core::MAX_PROXIES,
			config.proxies.len()
		);
		std::process::exit(1);
	}

	match send(Request::Save { config }) {
		Response::Ok { message } => println!("{}", message.unwrap_or_else(|| "ok".into())),
		other => exit_on_unexpected(other),
	}
}

fn read_user_config(path: &Path) -> Result<UserConfig, String> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}

fn cmd_watch() {
	let result = client().watch(|event| match event {
		Event::Logs(lines) => {
			for line in lines {
				println!("{}", line);
			}
		}
		Event::Status(StatusEvent::Start) => println!("{}", "● frpc started".green()),
		Event::Status(StatusEvent::Stop) => println!("{}", "○ frpc stopped".red()),
	});
	if let Err(e) = result {
		eprintln!("error: {}", e);
		std::process::exit(1);
	}
}

fn cmd_shutdown() {
	match send(Request::Shutdown) {
		Response::Ok { message } => eprintln!("{}", message.unwrap_or_default()),
		other => exit_on_unexpected(other),
	}
}

fn render_status(status: &ServiceStatus) {
	let circle = if status.running {
		"●".green().to_string()
	} else if status.config.is_some() {
		"○".yellow().to_string()
	} else {
		"○".dimmed().to_string()
	};
	let message = if status.success {
		status.message.clone()
	} else {
		status.message.red().to_string()
	};
	println!("{} {}", circle, message);
}

fn render_config(config: &UserConfig) {
	let server = &config.server;
	let remark = if server.remark.is_empty() {
		String::new()
	} else {
		format!(" ({})", server.remark)
	};
	println!("  server  {}:{}{}", server.addr, server.port, remark.dimmed());
	println!("  auto    {}", if server.auto_start { "on" } else { "off" });

	let name_width = config.proxies.iter().map(|p| p.name.len()).max().unwrap_or(0);
	for proxy in &config.proxies {
		let state = if proxy.enabled {
			"on".green().to_string()
		} else {
			"off".dimmed().to_string()
		};
		let target = match proxy.proxy_type {
			mole_core::ProxyType::Http => proxy.domains.join(", "),
			_ => format!(":{}", proxy.remote_port.unwrap_or_default()),
		};
		println!(
			"  {:<width$}  {:<4} {}:{} -> {}  {}",
			proxy.name,
			proxy.proxy_type,
			proxy.local_ip,
			proxy.local_port,
			target,
			state,
			width = name_width
		);
	}
}

fn exit_on_unexpected(response: Response) -> ! {
	match response {
		Response::Error { message } => eprintln!("error: {}", message),
		other => eprintln!("error: unexpected response: {:?}", other),
	}
	std::process::exit(1);
}
