use std::sync::Arc;

use mole_core::{AppPaths, BroadcastSink, MoleService, PackagedExecutable, SupervisorConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};

use crate::config;
use crate::protocol::{Request, Response};

struct Daemon {
	service: Arc<MoleService>,
	sink: BroadcastSink,
	shutdown: watch::Sender<bool>,
}

pub async fn run(paths: AppPaths) {
	let settings = config::load_settings(&paths);
	let sink = BroadcastSink::new();
	let resource_dir = settings.frpc.resource_dir();
	tracing::info!("packaged frpc expected under {}", resource_dir.display());

	let service = MoleService::with_flush_interval(
		SupervisorConfig::new(paths.clone()),
		Arc::new(PackagedExecutable::new(resource_dir)),
		Arc::new(sink.clone()),
		settings.logs.flush_interval(),
	);

	let state_dir = paths.state_dir();
	if let Err(e) = std::fs::create_dir_all(&state_dir) {
		tracing::error!("failed to create {}: {}", state_dir.display(), e);
		return;
	}
	let _ = std::fs::write(paths.pid_path(), std::process::id().to_string());

	let socket_path = paths.socket_path();
	if socket_path.exists() {
		let _ = std::fs::remove_file(&socket_path);
	}

	let (shutdown, shutdown_rx) = watch::channel(false);
	service.startup(shutdown_rx.clone());

	let daemon = Arc::new(Daemon { service: Arc::clone(&service), sink, shutdown });
	let server_daemon = Arc::clone(&daemon);
	let server_paths = paths.clone();
	let server_handle = tokio::spawn(async move {
		run_socket_server(&server_paths, server_daemon).await;
	});

	tracing::info!("daemon started (pid {})", std::process::id());

	let mut stop_requested = shutdown_rx.clone();
	tokio::select! {
		_ = server_handle => {},
		_ = stop_requested.wait_for(|stop| *stop) => {
			tracing::info!("shutdown requested");
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("shutting down");
		}
	}

	daemon.shutdown.send_replace(true);
	service.shutdown().await;

	let _ = std::fs::remove_file(paths.socket_path());
	let _ = std::fs::remove_file(paths.pid_path());
}

async fn run_socket_server(paths: &AppPaths, daemon: Arc<Daemon>) {
	let socket_path = paths.socket_path();

	let listener = match UnixListener::bind(&socket_path) {
		Ok(l) => l,
		Err(e) => {
			tracing::error!("failed to bind socket {}: {}", socket_path.display(), e);
			return;
		}
	};

	tracing::info!("listening on {}", socket_path.display());

	loop {
		let (stream, _) = match listener.accept().await {
			Ok(s) => s,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				continue;
			}
		};

		let daemon = Arc::clone(&daemon);
		tokio::spawn(async move {
			handle_connection(stream, daemon).await;
		});
	}
}

async fn handle_connection(stream: UnixStream, daemon: Arc<Daemon>) {
	let (reader, mut writer) = stream.into_split();
	let mut lines = BufReader::new(reader).lines();

	while let Ok(Some(line)) = lines.next_line().await {
		let request: Request = match serde_json::from_str(&line) {
			Ok(r) => r,
			Err(e) => {
				tracing::warn!("invalid request: {}", e);
				let response = Response::Error { message: format!("invalid request: {}", e) };
				if write_response(&mut writer, &response).await.is_err() {
					break;
				}
				continue;
			}
		};

		if let Request::Subscribe = request {
			stream_events(&mut writer, daemon.sink.subscribe()).await;
			return;
		}

		let response = handle_request(&daemon, request).await;
		if write_response(&mut writer, &response).await.is_err() {
			break;
		}
	}
}

async fn handle_request(daemon: &Daemon, request: Request) -> Response {
	let service = &daemon.service;
	match request {
		Request::Ping => Response::Pong,
		Request::Status => Response::Status { status: service.get_status().await },
		Request::Connect => Response::Status { status: service.connect().await },
		Request::Disconnect => Response::Status { status: service.disconnect().await },
		Request::Reconnect => Response::Status { status: service.reconnect().await },
		Request::Save { config } => match service.save_user_config(config).await {
			Ok(_) => Response::Ok { message: Some("config saved".to_string()) },
			Err(e) => Response::Error { message: e.to_string() },
		},
		Request::Subscribe => Response::Error {
			message: "subscribe is handled per connection".to_string(),
		},
		Request::Shutdown => {
			daemon.shutdown.send_replace(true);
			Response::Ok { message: Some("shutting down".to_string()) }
		}
	}
}

async fn stream_events(writer: &mut OwnedWriteHalf, mut events: broadcast::Receiver<mole_core::Event>) {
	loop {
		let event = match events.recv().await {
			Ok(event) => event,
			Err(broadcast::error::RecvError::Lagged(skipped)) => {
				tracing::warn!("event subscriber lagged, {} events dropped", skipped);
				continue;
			}
			Err(broadcast::error::RecvError::Closed) => break,
		};
		if write_response(writer, &Response::Event { event }).await.is_err() {
			break;
		}
	}
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> std::io::Result<()> {
	let mut data = serde_json::to_vec(response).map_err(std::io::Error::other)?;
	data.push(b'\n');
	writer.write_all(&data).await
}
