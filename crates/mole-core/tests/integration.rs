#![cfg(unix)]

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::watch;

use mole_core::*;

const FAKE_FRPC: &str = r#"#!/bin/sh
echo spawn >> "$(dirname "$2")/spawns.log"
echo "fake frpc using $2"
echo "fake frpc warning" >&2
exec sleep 30
"#;

struct Script(&'static str);

impl ExecutableSource for Script {
	fn executable_bytes(&self) -> io::Result<Vec<u8>> {
		Ok(self.0.as_bytes().to_vec())
	}
}

struct Unavailable;

impl ExecutableSource for Unavailable {
	fn executable_bytes(&self) -> io::Result<Vec<u8>> {
		Err(io::Error::new(io::ErrorKind::NotFound, "no frpc for this platform"))
	}
}

/// Refuses to kill while jammed, then behaves like the real thing.
#[derive(Default)]
struct JammedKiller {
	jammed: AtomicBool,
}

impl ProcessControl for JammedKiller {
	fn kill_tree(&self, pid: u32) -> mole_core::Result<()> {
		if self.jammed.load(Ordering::SeqCst) {
			return Err(MoleError::Kill(format!("pid {} refused to die", pid)));
		}
		SystemProcessControl.kill_tree(pid)
	}
}

struct Harness {
	service: Arc<MoleService>,
	events: broadcast::Receiver<Event>,
	dir: tempfile::TempDir,
	_shutdown: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
}

fn harness_with(executable: Arc<dyn ExecutableSource>) -> Harness {
	harness_with_control(executable, Arc::new(SystemProcessControl))
}

fn harness_with_control(
	executable: Arc<dyn ExecutableSource>,
	control: Arc<dyn ProcessControl>,
) -> Harness {
	let dir = tempfile::tempdir().unwrap();
	let sink = BroadcastSink::new();
	let events = sink.subscribe();
	let service = MoleService::with_flush_interval(
		SupervisorConfig { paths: AppPaths::with_root(dir.path()), control },
		executable,
		Arc::new(sink),
		Duration::from_millis(50),
	);
	let (shutdown, shutdown_rx) = watch::channel(false);
	Harness { service, events, dir, _shutdown: shutdown, shutdown_rx }
}

fn harness() -> Harness {
	harness_with(Arc::new(Script(FAKE_FRPC)))
}

fn user_config(auto_start: bool) -> UserConfig {
	UserConfig {
		server: ServerConfig {
			addr: "127.0.0.1".into(),
			port: 7000,
			token: "token".into(),
			remark: "test".into(),
			auto_start,
		},
		proxies: vec![ProxyRule {
			id: "p1".into(),
			enabled: true,
			proxy_type: ProxyType::Tcp,
			name: "ssh".into(),
			local_ip: "127.0.0.1".into(),
			local_port: 22,
			remote_port: Some(6022),
			domains: vec![],
		}],
		..Default::default()
	}
}

fn spawn_count(root: &Path) -> usize {
	std::fs::read_to_string(root.join("bin").join("spawns.log"))
		.map(|s| s.lines().count())
		.unwrap_or(0)
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
	let mut out = Vec::new();
	while let Ok(event) = rx.try_recv() {
		out.push(event);
	}
	out
}

fn stop_events(events: &[Event]) -> usize {
	events
		.iter()
		.filter(|e| **e == Event::Status(StatusEvent::Stop))
		.count()
}

async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
	for _ in 0..100 {
		if check() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(20)).await;
	}
	false
}

// --- Status facade ---

#[tokio::test]
async fn unconfigured_status_after_startup() {
	let h = harness();
	h.service.startup(h.shutdown_rx.clone()).await.unwrap();

	let status = h.service.get_status().await;
	assert!(status.success);
	assert!(!status.running);
	assert!(status.config.is_none());
	assert_eq!(status.message, "not configured yet");
	assert_eq!(h.service.supervisor().state().await, SupervisorState::Unconfigured);
}

#[tokio::test]
async fn get_status_waits_for_initialization() {
	let h = harness();
	ConfigStore::new(AppPaths::with_root(h.dir.path()).user_config_path())
		.save(&user_config(true))
		.unwrap();

	let pending = {
		let service = Arc::clone(&h.service);
		tokio::spawn(async move { service.get_status().await })
	};
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert!(!pending.is_finished());

	h.service.startup(h.shutdown_rx.clone());
	let status = tokio::time::timeout(Duration::from_secs(2), pending)
		.await
		.unwrap()
		.unwrap();

	assert!(status.running, "auto-start should have brought frpc up");
	assert_eq!(status.message, "frpc is running");
	assert!(status.config.unwrap().server.auto_start);

	h.service.shutdown().await;
}

#[tokio::test]
async fn failed_auto_start_reports_idle() {
	let h = harness_with(Arc::new(Unavailable));
	ConfigStore::new(AppPaths::with_root(h.dir.path()).user_config_path())
		.save(&user_config(true))
		.unwrap();

	h.service.startup(h.shutdown_rx.clone());
	let status = h.service.get_status().await;
	assert!(status.success);
	assert!(!status.running);
	assert_eq!(status.message, "frpc is idle");
}

#[tokio::test]
async fn broken_config_leaves_service_unconfigured() {
	let h = harness();
	let path = AppPaths::with_root(h.dir.path()).user_config_path();
	std::fs::create_dir_all(path.parent().unwrap()).unwrap();
	std::fs::write(&path, "[server\naddr = ").unwrap();

	h.service.startup(h.shutdown_rx.clone());
	let status = h.service.get_status().await;
	assert!(status.config.is_none());
	assert!(!status.running);
	assert_eq!(spawn_count(h.dir.path()), 0);
}

#[tokio::test]
async fn connect_without_config_fails() {
	let h = harness();
	let status = h.service.connect().await;
	assert!(!status.success);
	assert!(!status.running);
	assert_eq!(spawn_count(h.dir.path()), 0);
}

#[tokio::test]
async fn connect_and_disconnect_round_trip() {
	let mut h = harness();
	h.service.save_user_config(user_config(false)).await.unwrap();

	let status = h.service.connect().await;
	assert!(status.success);
	assert!(!status.running);
	assert_eq!(status.message, "starting");

	let sup = Arc::clone(h.service.supervisor());
	assert!(wait_until(|| sup.is_running()).await);

	let again = h.service.connect().await;
	assert!(again.running);
	assert!(again.message.contains("already running"));

	let status = h.service.disconnect().await;
	assert!(status.success);
	assert!(!status.running);
	assert_eq!(status.message, "disconnected");

	let events = drain(&mut h.events);
	assert!(events.contains(&Event::Status(StatusEvent::Start)));
	assert_eq!(spawn_count(h.dir.path()), 1);
}

// --- Supervisor lifecycle ---

#[tokio::test]
async fn start_without_config_is_not_configured() {
	let h = harness();
	let result = h.service.supervisor().start().await;
	assert!(matches!(result, Err(MoleError::NotConfigured)));
}

#[tokio::test]
async fn missing_executable_reverts_to_idle() {
	let mut h = harness_with(Arc::new(Unavailable));
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	let result = sup.start().await;
	assert!(matches!(result, Err(MoleError::MissingExecutable { .. })));
	assert!(!sup.is_running());
	assert_eq!(sup.state().await, SupervisorState::Idle);

	let events = drain(&mut h.events);
	assert!(!events.contains(&Event::Status(StatusEvent::Start)));
	assert!(events.iter().any(|e| matches!(e, Event::Logs(lines) if lines[0].contains("failed to start"))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_starts_spawn_once() {
	let h = harness();
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	let (a, b) = tokio::join!(sup.start(), sup.start());
	let outcomes = [a.unwrap(), b.unwrap()];
	let started = outcomes
		.iter()
		.filter(|o| matches!(o, StartOutcome::Started { .. }))
		.count();
	assert_eq!(started, 1);
	assert!(outcomes
		.iter()
		.any(|o| matches!(o, StartOutcome::AlreadyRunning | StartOutcome::AlreadyStarting)));

	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(spawn_count(h.dir.path()), 1);

	sup.stop().await.unwrap();
}

#[tokio::test]
async fn stop_when_idle_does_nothing() {
	let mut h = harness();
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	assert_eq!(sup.stop().await.unwrap(), StopOutcome::AlreadyStopped);
	assert!(drain(&mut h.events).is_empty());

	let status = h.service.disconnect().await;
	assert!(status.success);
	assert_eq!(status.message, "already stopped");
}

#[tokio::test]
async fn stop_publishes_a_single_stop_event() {
	let mut h = harness();
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	sup.start().await.unwrap();
	assert_eq!(sup.stop().await.unwrap(), StopOutcome::Stopped);
	assert!(!sup.is_running());

	// Give the exit waiter time to observe the kill and stand down.
	tokio::time::sleep(Duration::from_millis(300)).await;
	let events = drain(&mut h.events);
	assert_eq!(stop_events(&events), 1);
	assert_eq!(sup.state().await, SupervisorState::Idle);
}

#[tokio::test]
async fn failed_kill_leaves_tunnel_running() {
	let killer = Arc::new(JammedKiller::default());
	let mut h = harness_with_control(Arc::new(Script(FAKE_FRPC)), killer.clone());
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;
	sup.start().await.unwrap();
	drain(&mut h.events);

	killer.jammed.store(true, Ordering::SeqCst);
	assert!(matches!(sup.stop().await, Err(MoleError::Kill(_))));
	assert!(sup.is_running());
	assert_eq!(sup.state().await, SupervisorState::Running);

	let status = h.service.disconnect().await;
	assert!(!status.success);
	assert!(status.running);
	assert!(status.message.contains("refused to die"));
	assert_eq!(stop_events(&drain(&mut h.events)), 0);

	killer.jammed.store(false, Ordering::SeqCst);
	assert_eq!(sup.stop().await.unwrap(), StopOutcome::Stopped);
	assert!(!sup.is_running());
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(stop_events(&drain(&mut h.events)), 1);
}

#[tokio::test]
async fn restart_leaves_no_previous_instance_behind() {
	let h = harness();
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	let StartOutcome::Started { pid: old } = sup.start().await.unwrap() else {
		panic!("expected a fresh start");
	};
	let StartOutcome::Started { pid: new } = sup.restart().await.unwrap() else {
		panic!("expected restart to spawn again");
	};
	assert_ne!(old, new);

	let gone = || nix::sys::signal::kill(nix::unistd::Pid::from_raw(old as i32), None).is_err();
	assert!(wait_until(gone).await, "pid {} outlived the restart", old);
	assert!(sup.is_running());

	sup.stop().await.unwrap();
}

#[tokio::test]
async fn start_repairs_non_executable_binary() {
	use std::os::unix::fs::PermissionsExt;

	let h = harness();
	let bin = h.dir.path().join("bin");
	std::fs::create_dir_all(&bin).unwrap();
	let exe = bin.join("frpc");
	std::fs::write(&exe, FAKE_FRPC).unwrap();
	std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o644)).unwrap();

	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;
	assert!(matches!(sup.start().await.unwrap(), StartOutcome::Started { .. }));

	sup.stop().await.unwrap();
}

#[tokio::test]
async fn crash_is_observed_without_disconnect() {
	let mut h = harness();
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	let StartOutcome::Started { pid } = sup.start().await.unwrap() else {
		panic!("expected a fresh start");
	};
	nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGKILL)
		.unwrap();

	assert!(wait_until(|| !sup.is_running()).await);
	tokio::time::sleep(Duration::from_millis(50)).await;

	let events = drain(&mut h.events);
	assert_eq!(stop_events(&events), 1);
	assert!(events.iter().any(|e| matches!(e, Event::Logs(lines)
		if lines.iter().any(|l| l.contains("frpc exited")))));
	assert_eq!(sup.stop().await.unwrap(), StopOutcome::AlreadyStopped);
}

#[tokio::test]
async fn output_from_both_streams_is_batched() {
	let mut h = harness();
	let sup = Arc::clone(h.service.supervisor());
	sup.set_config(Some(user_config(false))).await;

	sup.start().await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	sup.logs().flush().await;

	let lines: Vec<String> = drain(&mut h.events)
		.into_iter()
		.filter_map(|e| match e {
			Event::Logs(lines) => Some(lines),
			_ => None,
		})
		.flatten()
		.collect();
	assert!(lines.iter().any(|l| l.starts_with("fake frpc using")), "lines: {:?}", lines);
	assert!(lines.iter().any(|l| l == "fake frpc warning"), "lines: {:?}", lines);

	sup.stop().await.unwrap();
}

#[tokio::test]
async fn ticker_flushes_while_running() {
	let mut h = harness();
	h.service.save_user_config(user_config(true)).await.unwrap();
	h.service.startup(h.shutdown_rx.clone());

	let mut saw_output = false;
	for _ in 0..50 {
		if let Ok(Ok(Event::Logs(lines))) =
			tokio::time::timeout(Duration::from_millis(100), h.events.recv()).await
		{
			if lines.iter().any(|l| l.starts_with("fake frpc")) {
				saw_output = true;
				break;
			}
		}
	}
	assert!(saw_output);

	h.service.shutdown().await;
}

// --- Configuration sync ---

#[tokio::test]
async fn save_regenerates_runtime_config() {
	let h = harness();
	let saved = h.service.save_user_config(user_config(false)).await.unwrap();
	assert_eq!(saved.config_version, CONFIG_VERSION);

	let frpc = std::fs::read_to_string(h.dir.path().join("bin").join("frpc.toml")).unwrap();
	let value: toml::Value = toml::from_str(&frpc).unwrap();
	assert_eq!(value["serverPort"].as_integer(), Some(7000));
	assert_eq!(value["proxies"][0]["remotePort"].as_integer(), Some(6022));

	let current = h.service.supervisor().config().await.unwrap();
	assert_eq!(current.server.remark, "test");
	assert!(current.last_updated.is_some());
}

#[tokio::test]
async fn save_while_running_restarts_frpc() {
	let mut h = harness();
	h.service.save_user_config(user_config(false)).await.unwrap();
	let sup = Arc::clone(h.service.supervisor());
	assert!(matches!(sup.start().await.unwrap(), StartOutcome::Started { .. }));
	drain(&mut h.events);

	let mut cfg = user_config(false);
	cfg.proxies[0].remote_port = Some(7022);
	h.service.save_user_config(cfg).await.unwrap();

	assert!(sup.is_running());
	let notices: Vec<String> = drain(&mut h.events)
		.into_iter()
		.filter_map(|e| match e {
			Event::Logs(lines) => Some(lines),
			_ => None,
		})
		.flatten()
		.filter(|l| l.starts_with("[mole]"))
		.collect();
	assert!(notices.iter().any(|l| l == "[mole] restarting frpc"), "notices: {:?}", notices);
	assert!(!notices.iter().any(|l| l.contains("disconnected by user")), "notices: {:?}", notices);
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(spawn_count(h.dir.path()), 2);

	let frpc = std::fs::read_to_string(h.dir.path().join("bin").join("frpc.toml")).unwrap();
	assert!(frpc.contains("7022"));

	let status = h.service.reconnect().await;
	assert!(status.success);
	assert!(status.running);
	tokio::time::sleep(Duration::from_millis(200)).await;
	assert_eq!(spawn_count(h.dir.path()), 3);

	h.service.shutdown().await;
	assert!(!sup.is_running());
}
