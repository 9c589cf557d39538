//! Line capture for the frpc subprocess.
//!
//! Two reader tasks (stdout, stderr) append into one shared buffer; a
//! process-wide ticker swaps the buffer out and publishes it as a single
//! `frp-logs` batch. The buffer has its own lock, independent of the
//! supervisor's state lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::events::{Event, EventSink};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

const NOTICE_PREFIX: &str = "[mole]";

#[derive(Clone)]
pub struct LogAggregator {
	buffer: Arc<Mutex<Vec<String>>>,
	sink: Arc<dyn EventSink>,
	ticker_running: Arc<AtomicBool>,
}

impl LogAggregator {
	pub fn new(sink: Arc<dyn EventSink>) -> Self {
		Self {
			buffer: Arc::new(Mutex::new(Vec::with_capacity(128))),
			sink,
			ticker_running: Arc::new(AtomicBool::new(false)),
		}
	}

	pub async fn append(&self, line: String) {
		self.buffer.lock().await.push(line);
	}

	/// Publishes everything buffered since the last flush as one batch.
	/// Returns the number of lines sent; an empty buffer publishes nothing.
	pub async fn flush(&self) -> usize {
		let batch = {
			let mut buffer = self.buffer.lock().await;
			if buffer.is_empty() {
				return 0;
			}
			std::mem::take(&mut *buffer)
		};
		let count = batch.len();
		self.sink.publish(Event::Logs(batch));
		count
	}

	/// Appends a supervisor message and pushes it out right away, behind any
	/// subprocess lines still waiting in the buffer.
	pub async fn notice(&self, message: impl AsRef<str>) {
		self.append(format!("{} {}", NOTICE_PREFIX, message.as_ref())).await;
		self.flush().await;
	}

	/// Spawns a reader that appends every line of `stream` until EOF.
	pub fn attach<R>(&self, stream: R, stream_name: &'static str) -> JoinHandle<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		let aggregator = self.clone();
		tokio::spawn(async move {
			pipe_lines(stream, stream_name, aggregator).await;
		})
	}

	/// Starts the flush ticker unless one is already running. The ticker ends
	/// when `shutdown` flips to true or its sender goes away, after a final flush.
	pub fn start_ticker(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> bool {
		if self.ticker_running.swap(true, Ordering::SeqCst) {
			return false;
		}

		let aggregator = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				if *shutdown.borrow() {
					break;
				}
				tokio::select! {
					_ = ticker.tick() => {
						aggregator.flush().await;
					}
					changed = shutdown.changed() => {
						if changed.is_err() {
							break;
						}
					}
				}
			}

			aggregator.flush().await;
			aggregator.ticker_running.store(false, Ordering::SeqCst);
			tracing::debug!("log flush ticker stopped");
		});
		true
	}

	pub fn ticker_running(&self) -> bool {
		self.ticker_running.load(Ordering::SeqCst)
	}
}

async fn pipe_lines<R>(stream: R, stream_name: &'static str, aggregator: LogAggregator)
where
	R: AsyncRead + Unpin,
{
	// Byte-based so a stray non-UTF-8 byte does not kill the reader.
	let mut reader = BufReader::new(stream);
	let mut buf: Vec<u8> = Vec::with_capacity(1024);

	loop {
		buf.clear();
		match reader.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				if buf.last() == Some(&b'\n') {
					buf.pop();
					if buf.last() == Some(&b'\r') {
						buf.pop();
					}
				}
				let line = String::from_utf8_lossy(&buf).into_owned();
				tracing::trace!("frpc {}: {}", stream_name, line);
				aggregator.append(line).await;
			}
			Err(e) => {
				tracing::debug!("frpc {} reader stopping on error: {}", stream_name, e);
				break;
			}
		}
	}

	tracing::debug!("frpc {} reader exited", stream_name);
}
