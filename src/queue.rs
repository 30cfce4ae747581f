use crate::connection::pool::Pool;
use crate::prelude::*;
use crate::stats::SharedStats;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_CAPACITY: usize = 10_000;

/// A bounded FIFO of encoded command strings, dispatched to the pool one at
/// a time every `interval`. Overflow drops the oldest item and logs a
/// warning rather than blocking producers.
pub struct ThrottledQueue {
    interval: Duration,
    capacity: usize,
    items: Mutex<VecDeque<String>>,
    pool: Arc<Pool>,
    stats: SharedStats,
}

impl ThrottledQueue {
    pub fn new(interval: Duration, pool: Arc<Pool>, stats: SharedStats) -> Arc<Self> {
        Arc::new(Self {
            interval,
            capacity: DEFAULT_CAPACITY,
            items: Mutex::new(VecDeque::new()),
            pool,
            stats,
        })
    }

    pub fn push(&self, item: String) {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            items.pop_front();
            warn!("queue at capacity ({}), dropping oldest item", self.capacity);
            if let Ok(mut stats) = self.stats.lock() {
                stats.queue_drops += 1;
            }
        }
        items.push_back(item);
        if let Ok(mut stats) = self.stats.lock() {
            stats.queue_depth = items.len() as u64;
        }
    }

    /// Runs the dispatch loop until a shutdown signal arrives. Intended to
    /// be spawned as its own task by the orchestrator.
    pub async fn run(self: Arc<Self>, channels: Channels) -> Result<()> {
        let mut shutdown = channels.shutdown.subscribe();
        let mut tick = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("throttled queue shutting down");
                    return Ok(());
                }
                _ = tick.tick() => {
                    let item = {
                        let mut items = self.items.lock().unwrap();
                        let item = items.pop_front();
                        if let Ok(mut stats) = self.stats.lock() {
                            stats.queue_depth = items.len() as u64;
                        }
                        item
                    };

                    if let Some(item) = item {
                        if let Err(e) = self.pool.execute(&item).await {
                            warn!("dropping command after pool error: {}", e);
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}
