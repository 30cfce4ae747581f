use crate::address::GroupAddress;
use crate::level::Level;
use crate::prelude::*;
use crate::protocol::command;
use crate::queue::ThrottledQueue;
use crate::stats::SharedStats;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[cfg(not(feature = "mocks"))]
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
#[cfg(feature = "mocks")]
const REPLY_TIMEOUT: Duration = Duration::from_millis(50); // fail fast in tests
/// ~10% of the 0-255 range, used by the INCREASE/DECREASE relative-level flow.
const RELATIVE_STEP: i16 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelReport {
    pub address: GroupAddress,
    pub raw: u8,
}

/// A one-shot registry keyed by `GroupAddress`, used to correlate an
/// asynchronous `300` status line with the relative-level request that
/// asked for it. Grounded on the teacher's `RegisterCache`
/// (`Arc<Mutex<Option<oneshot::Sender<_>>>>` per-key registry), keyed here
/// by address instead of register number, with an explicit 5s timeout and
/// a reject-if-already-pending rule that `RegisterCache` doesn't need
/// (register reads there aren't mutually exclusive the way a relative-level
/// op must be).
pub struct Correlator {
    pending: Mutex<HashMap<GroupAddress, oneshot::Sender<u8>>>,
    stats: SharedStats,
}

impl Correlator {
    pub fn new(stats: SharedStats) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            stats,
        })
    }

    /// Registers a one-shot listener for `address`. Returns an error if a
    /// listener is already pending for that address (§4.3 point 5).
    fn register(&self, address: GroupAddress) -> Result<oneshot::Receiver<u8>> {
        let mut pending = self.pending.lock().unwrap();
        if pending.contains_key(&address) {
            bail!("correlator.rs:relative-level op already pending for {}", address);
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(address, tx);
        Ok(rx)
    }

    /// Removes and fulfills a pending listener for `address`, if any.
    /// Called by the dispatch loop whenever a level report arrives; no-op
    /// for addresses with no pending request.
    fn fulfill(&self, report: LevelReport) {
        let sender = self.pending.lock().unwrap().remove(&report.address);
        if let Some(sender) = sender {
            let _ = sender.send(report.raw);
        }
    }

    fn remove(&self, address: &GroupAddress) {
        self.pending.lock().unwrap().remove(address);
    }

    /// Drains `channels.levels`, fulfilling pending listeners as reports
    /// arrive. Non-matching reports (no pending listener for that address)
    /// are ignored and must not disturb other pending listeners.
    pub async fn run(self: Arc<Self>, channels: Channels) -> Result<()> {
        let mut levels = channels.levels.subscribe();
        let mut shutdown = channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("correlator shutting down");
                    return Ok(());
                }
                report = levels.recv() => {
                    match report {
                        Ok(report) => self.fulfill(report),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("correlator lagged by {} level reports", n);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            bail!("correlator.rs:levels channel closed");
                        }
                    }
                }
            }
        }
    }

    /// Executes the full INCREASE/DECREASE flow (§4.3): enqueue a GET,
    /// await the matching level report with a bounded timeout, then enqueue
    /// a clamped RAMP. State machine: querying -> waitingLevel ->
    /// issuingRamp -> done|timedOut.
    pub async fn adjust_relative(
        self: &Arc<Self>,
        address: GroupAddress,
        increase: bool,
        queue: &Arc<ThrottledQueue>,
        project: &str,
    ) -> Result<()> {
        let rx = self.register(address)?;

        queue.push(command::encode_get_level(&address, project));

        let delta = if increase { RELATIVE_STEP } else { -RELATIVE_STEP };

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(raw)) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.correlator_hits += 1;
                }
                let new_level = Level::new(raw).saturating_add_signed(delta);
                queue.push(command::encode_ramp_raw(&address, new_level.raw(), project));
                Ok(())
            }
            Ok(Err(_)) => {
                bail!("correlator.rs:level reply sender dropped for {}", address);
            }
            Err(_) => {
                self.remove(&address);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.correlator_timeouts += 1;
                }
                warn!("timed out waiting for level reply for {}", address);
                bail!("correlator.rs:timed out waiting for level reply for {}", address);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
