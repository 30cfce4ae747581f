use crate::connection::backoff;
use crate::connection::single::{self, Sink, Stream};
use crate::prelude::*;
use crate::protocol::line::ParsedLine;
use crate::stats::SharedStats;

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Mutable pool bookkeeping, covered by a single mutex per the design
/// notes: healthy-set membership, the healthy-index cache, the round-robin
/// cursor, and per-slot retry counts are all mutated by multiple tasks
/// (readers, health checker, reconnect callbacks) and must stay consistent
/// with each other.
struct PoolState {
    healthy: Vec<bool>,
    healthy_cache: Vec<usize>,
    cursor: usize,
    retry_counts: Vec<u32>,
    pending_reconnects: HashSet<usize>,
    shutting_down: bool,
}

impl PoolState {
    fn new(size: usize) -> Self {
        Self {
            healthy: vec![false; size],
            healthy_cache: Vec::new(),
            cursor: 0,
            retry_counts: vec![0; size],
            pending_reconnects: HashSet::new(),
            shutting_down: false,
        }
    }

    fn rebuild_cache(&mut self) {
        self.healthy_cache = self
            .healthy
            .iter()
            .enumerate()
            .filter_map(|(i, &h)| h.then_some(i))
            .collect();
    }

    fn mark_healthy(&mut self, idx: usize) {
        self.healthy[idx] = true;
        self.retry_counts[idx] = 0;
        self.pending_reconnects.remove(&idx);
        self.rebuild_cache();
    }

    fn mark_unhealthy(&mut self, idx: usize) {
        self.healthy[idx] = false;
        self.rebuild_cache();
    }

    fn next_healthy(&mut self) -> Option<usize> {
        if self.healthy_cache.is_empty() {
            return None;
        }
        let idx = self.healthy_cache[self.cursor % self.healthy_cache.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Some(idx)
    }
}

pub struct Pool {
    host: String,
    port: u16,
    size: usize,
    health_check_interval: Duration,
    keep_alive_interval: Duration,
    connection_timeout: Duration,
    max_retries: u32,
    channels: Channels,
    state: Mutex<PoolState>,
    /// Each slot's write half, held in a `tokio::sync::Mutex` so a writer
    /// (`execute`/keep-alive) can hold the lock across the `.await` of the
    /// actual write without blocking a reader — the read half lives
    /// entirely in that slot's reader task instead (see `spawn_reader`), so
    /// there's no reader/writer contention over this handle at all.
    sockets: Vec<AsyncMutex<Option<Sink>>>,
    stats: SharedStats,
}

impl Pool {
    pub fn new(
        host: String,
        port: u16,
        size: usize,
        health_check_interval: Duration,
        keep_alive_interval: Duration,
        connection_timeout: Duration,
        max_retries: u32,
        channels: Channels,
        stats: SharedStats,
    ) -> Arc<Self> {
        let mut sockets = Vec::with_capacity(size);
        sockets.resize_with(size, || AsyncMutex::new(None));

        Arc::new(Self {
            host,
            port,
            size,
            health_check_interval,
            keep_alive_interval,
            connection_timeout,
            max_retries,
            channels,
            state: Mutex::new(PoolState::new(size)),
            sockets,
            stats,
        })
    }

    /// Opens all slots concurrently; returns once at least one is healthy.
    /// Slots that fail to connect immediately begin their own reconnection
    /// schedule in the background rather than blocking `start`.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.healthy_cache.is_empty() || !state.pending_reconnects.is_empty() {
                warn!("pool already started, ignoring");
                return Ok(());
            }
            state.shutting_down = false;
        }

        let attempts = (0..self.size).map(|idx| {
            let this = self.clone();
            async move { this.try_connect(idx).await }
        });
        futures::future::join_all(attempts).await;

        self.clone().spawn_health_check();
        self.clone().spawn_keep_alive();

        let healthy = self.state.lock().unwrap().healthy_cache.len();
        if healthy == 0 {
            bail!("pool.rs:no healthy connections after initial connect attempt");
        }
        info!("connection pool started with {}/{} slots healthy", healthy, self.size);
        Ok(())
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        state.pending_reconnects.clear();
        for i in 0..self.size {
            state.healthy[i] = false;
            state.retry_counts[i] = 0;
        }
        state.rebuild_cache();
        drop(state);

        for socket in &self.sockets {
            *socket.lock().await = None;
        }
        info!("connection pool stopped");
    }

    /// Writes `cmd` to a round-robin-selected healthy slot, framed by the
    /// caller's newline-terminated string. No internal retry: failure
    /// demotes the slot and schedules its reconnect; the queue owns retry
    /// policy for the command itself.
    pub async fn execute(self: &Arc<Self>, cmd: &str) -> Result<()> {
        let idx = {
            let mut state = self.state.lock().unwrap();
            state.next_healthy().ok_or_else(|| anyhow!("pool.rs:NoHealthyConnections"))?
        };

        match self.write_to_slot(idx, cmd).await {
            Ok(()) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.pool_writes += 1;
                }
                Ok(())
            }
            Err(e) => {
                warn!("pool slot {} write failed: {}, demoting", idx, e);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.pool_write_failures += 1;
                }
                self.demote_and_reschedule(idx).await;
                Err(e)
            }
        }
    }

    async fn write_to_slot(&self, idx: usize, line: &str) -> Result<()> {
        let mut guard = self.sockets[idx].lock().await;
        match guard.as_mut() {
            Some(sink) => single::write_line(sink, line).await,
            None => bail!("pool.rs:slot {} has no socket", idx),
        }
    }

    async fn demote_and_reschedule(self: &Arc<Self>, idx: usize) {
        {
            let mut state = self.state.lock().unwrap();
            if state.shutting_down {
                return;
            }
            state.mark_unhealthy(idx);
        }
        *self.sockets[idx].lock().await = None;
        self.schedule_reconnect(idx);
    }

    fn schedule_reconnect(self: &Arc<Self>, idx: usize) {
        {
            let mut state = self.state.lock().unwrap();
            if state.shutting_down || state.pending_reconnects.contains(&idx) {
                return;
            }
            state.pending_reconnects.insert(idx);
        }

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let (retry_count, shutting_down) = {
                    let state = this.state.lock().unwrap();
                    (state.retry_counts[idx], state.shutting_down)
                };
                if shutting_down {
                    return;
                }

                // the exponent is capped at max_retries; backoff itself
                // already caps the resulting delay at 60s regardless.
                let delay = backoff::delay_for_retry(retry_count.min(this.max_retries));
                tokio::time::sleep(delay).await;

                let shutting_down = this.state.lock().unwrap().shutting_down;
                if shutting_down {
                    return;
                }

                if this.try_connect(idx).await.is_ok() {
                    return;
                }

                let mut state = this.state.lock().unwrap();
                state.retry_counts[idx] = state.retry_counts[idx].saturating_add(1);
            }
        });
    }

    async fn try_connect(self: &Arc<Self>, idx: usize) -> Result<()> {
        match single::connect(&self.host, self.port, self.connection_timeout).await {
            Ok((sink, stream)) => {
                *self.sockets[idx].lock().await = Some(sink);
                {
                    let mut state = self.state.lock().unwrap();
                    state.mark_healthy(idx);
                }
                if let Ok(mut stats) = self.stats.lock() {
                    stats.pool_reconnects += 1;
                }
                info!("pool slot {} connected", idx);
                self.clone().spawn_reader(idx, stream);
                Ok(())
            }
            Err(e) => {
                debug!("pool slot {} connect failed: {}", idx, e);
                self.schedule_reconnect(idx);
                Err(e)
            }
        }
    }

    /// Owns the slot's read half for the whole lifetime of the connection —
    /// no contention with `write_to_slot`/keep-alive over the socket, since
    /// those only ever touch the write half kept in `self.sockets[idx]`.
    fn spawn_reader(self: Arc<Self>, idx: usize, mut stream: Stream) {
        tokio::spawn(async move {
            let mut shutdown = self.channels.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    line = stream.next() => {
                        match line {
                            Some(Ok(line)) => {
                                let parsed = ParsedLine::parse(&line);
                                if !matches!(parsed, ParsedLine::Invalid)
                                    && self.channels.from_cgate.send(parsed).is_err()
                                {
                                    warn!("pool slot {} from_cgate channel closed", idx);
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("pool slot {} read error: {}", idx, e);
                                self.demote_and_reschedule(idx).await;
                                return;
                            }
                            None => {
                                warn!("pool slot {} EOF", idx);
                                self.demote_and_reschedule(idx).await;
                                return;
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_health_check(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.health_check_interval);
            let mut shutdown = self.channels.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {
                        let (shutting_down, size) = {
                            let state = self.state.lock().unwrap();
                            (state.shutting_down, self.size)
                        };
                        if shutting_down {
                            return;
                        }
                        for idx in 0..size {
                            let has_socket = self.sockets[idx].lock().await.is_some();
                            let marked_healthy = self.state.lock().unwrap().healthy[idx];
                            if marked_healthy != has_socket {
                                warn!("pool slot {} health mismatch, correcting", idx);
                                let mut state = self.state.lock().unwrap();
                                if has_socket {
                                    state.mark_healthy(idx);
                                } else {
                                    state.mark_unhealthy(idx);
                                    drop(state);
                                    self.schedule_reconnect(idx);
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_keep_alive(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.keep_alive_interval);
            let mut shutdown = self.channels.shutdown.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {
                        let healthy: Vec<usize> = self.state.lock().unwrap().healthy_cache.clone();
                        for idx in healthy {
                            if let Err(e) = self.write_to_slot(idx, "# keepalive").await {
                                warn!("pool slot {} keepalive failed: {}", idx, e);
                                self.demote_and_reschedule(idx).await;
                            }
                        }
                    }
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn healthy_count(&self) -> usize {
        self.state.lock().unwrap().healthy_cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_healthy_cache() {
        let mut state = PoolState::new(3);
        state.mark_healthy(0);
        state.mark_healthy(2);

        let mut picks = Vec::new();
        for _ in 0..4 {
            picks.push(state.next_healthy().unwrap());
        }
        assert_eq!(picks, vec![0, 2, 0, 2]);
    }

    #[test]
    fn cache_reflects_membership_after_mutation() {
        let mut state = PoolState::new(3);
        state.mark_healthy(0);
        state.mark_healthy(1);
        state.mark_unhealthy(0);
        assert_eq!(state.healthy_cache, vec![1]);
    }

    #[test]
    fn no_healthy_slots_returns_none() {
        let mut state = PoolState::new(2);
        assert_eq!(state.next_healthy(), None);
    }

    #[test]
    fn marking_healthy_resets_retry_count_and_pending() {
        let mut state = PoolState::new(2);
        state.retry_counts[0] = 4;
        state.pending_reconnects.insert(0);
        state.mark_healthy(0);
        assert_eq!(state.retry_counts[0], 0);
        assert!(!state.pending_reconnects.contains(&0));
    }
}
