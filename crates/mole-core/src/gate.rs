use tokio::sync::watch;

/// One-shot broadcast latch. Every waiter is released once `open` is called;
/// later waits return immediately.
#[derive(Clone)]
pub struct InitGate {
	tx: watch::Sender<bool>,
}

impl InitGate {
	pub fn new() -> Self {
		let (tx, _) = watch::channel(false);
		Self { tx }
	}

	pub fn open(&self) {
		self.tx.send_replace(true);
	}

	pub fn is_open(&self) -> bool {
		*self.tx.borrow()
	}

	/// Opens the gate when the returned guard drops, whichever way the
	/// initializing task ends.
	pub fn open_on_drop(&self) -> GateGuard {
		GateGuard { gate: self.clone() }
	}

	pub async fn wait(&self) {
		let mut rx = self.tx.subscribe();
		// The sender lives in self, so the channel cannot close under us.
		let _ = rx.wait_for(|open| *open).await;
	}
}

pub struct GateGuard {
	gate: InitGate,
}

impl Drop for GateGuard {
	fn drop(&mut self) {
		self.gate.open();
	}
}

impl Default for InitGate {
	fn default() -> Self {
		Self::new()
	}
}
