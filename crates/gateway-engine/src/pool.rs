//! The worker pool: owns the translator subprocesses, hands them out one
//! request at a time through a bounded ready channel, and keeps them alive.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::api::{PoolConfig, TranslateError, Translator};
use crate::metrics::GatewayMetrics;
use crate::wire::{self, WireRequest};
use crate::worker::{self, ReadyToken, WorkerSlot};

/// Hard upper bound on waiting for a free worker.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request I/O deadline on the rendezvous connection.
const IO_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Cadence of the zombie-reaping supervisor pass.
const SUPERVISOR_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence of the gauge/uptime/memory sampler.
const METRICS_INTERVAL: Duration = Duration::from_secs(5);

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    pub(crate) metrics: GatewayMetrics,
    pub(crate) slots: Vec<WorkerSlot>,
    pub(crate) shutdown: CancellationToken,
    ready_tx: mpsc::Sender<ReadyToken>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<ReadyToken>>,
    waiters: AtomicI64,
    watchers: tokio::sync::Mutex<JoinSet<usize>>,
}

/// A fixed set of supervised translator subprocesses multiplexed behind
/// [`Translator::translate`].
///
/// Create once per process with [`WorkerPool::new`]; shut down with
/// [`WorkerPool::shutdown`].
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    loops: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the pool: create the rendezvous directory (fatal on failure),
    /// spawn one watcher per worker, and start the supervisor and metrics
    /// loops. Must be called from within a tokio runtime.
    pub fn new(mut config: PoolConfig, metrics: GatewayMetrics) -> anyhow::Result<Self> {
        config.max_workers = config.max_workers.max(1);

        std::fs::create_dir_all(&config.rendezvous_dir).with_context(|| {
            format!(
                "create rendezvous directory {}",
                config.rendezvous_dir.display()
            )
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &config.rendezvous_dir,
                std::fs::Permissions::from_mode(0o755),
            )
            .with_context(|| {
                format!(
                    "set permissions on {}",
                    config.rendezvous_dir.display()
                )
            })?;
        }

        let (ready_tx, ready_rx) = mpsc::channel(config.max_workers);
        let slots = (0..config.max_workers)
            .map(|id| WorkerSlot::new(id, &config.rendezvous_dir))
            .collect();

        let inner = Arc::new(PoolInner {
            config,
            metrics,
            slots,
            shutdown: CancellationToken::new(),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            waiters: AtomicI64::new(0),
            watchers: tokio::sync::Mutex::new(JoinSet::new()),
        });

        {
            let mut watchers = inner
                .watchers
                .try_lock()
                .expect("watcher set is uncontended at construction");
            for id in 0..inner.slots.len() {
                watchers.spawn(worker::run_watcher(inner.clone(), id));
            }
        }

        let loops = vec![
            tokio::spawn(supervisor_loop(inner.clone())),
            tokio::spawn(sampler_loop(inner.clone())),
        ];

        Ok(Self {
            inner,
            loops: std::sync::Mutex::new(loops),
        })
    }

    /// Translate `text` using one worker, waiting at most until `deadline`
    /// (and never longer than the hard acquisition and I/O limits).
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        deadline: Option<Instant>,
    ) -> Result<String, TranslateError> {
        self.inner
            .clone()
            .translate(text, source_lang, target_lang, deadline)
            .await
    }

    /// One synthetic translation with known-good inputs.
    pub async fn check_health(&self, deadline: Option<Instant>) -> Result<(), TranslateError> {
        self.translate("test", "en", "fr", deadline).await.map(|_| ())
    }

    /// Stop all loops, kill every subprocess and unlink every socket.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        {
            let mut watchers = self.inner.watchers.lock().await;
            while watchers.join_next().await.is_some() {}
        }
        let loops: Vec<JoinHandle<()>> = self.loops.lock().unwrap().drain(..).collect();
        for handle in loops {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl Translator for WorkerPool {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        deadline: Option<Instant>,
    ) -> Result<String, TranslateError> {
        WorkerPool::translate(self, text, source_lang, target_lang, deadline).await
    }
}

impl PoolInner {
    pub(crate) fn engine_label(&self) -> &'static str {
        self.config.engine.as_str()
    }

    /// Put a ready token back into circulation. The channel capacity equals
    /// the worker count and at most one token exists per slot, so rejection
    /// indicates a lost-token bug; the supervisor pass re-issues it.
    pub(crate) fn enqueue_ready(&self, token: ReadyToken) {
        if self.ready_tx.try_send(token).is_err() {
            warn!(worker_id = token.id, "ready channel rejected token");
            let mut st = self.slots[token.id].state.lock().unwrap();
            st.token_out = false;
        }
    }

    async fn translate(
        self: Arc<Self>,
        text: &str,
        source_lang: &str,
        target_lang: &str,
        deadline: Option<Instant>,
    ) -> Result<String, TranslateError> {
        let started = Instant::now();

        let token = match self.acquire(deadline).await {
            Ok(token) => token,
            Err(err) => {
                self.record_outcome(err.outcome(), started);
                return Err(err);
            }
        };
        let socket_path = self.slots[token.id].socket_path.clone();
        let guard = ReleaseGuard {
            pool: self.clone(),
            token,
        };

        let connect_started = Instant::now();
        let connected = UnixStream::connect(&socket_path).await;
        self.metrics
            .worker_connection_open_seconds
            .with_label_values(&[self.engine_label()])
            .observe(connect_started.elapsed().as_secs_f64());
        let stream = match connected {
            Ok(stream) => {
                self.metrics
                    .worker_connections_total
                    .with_label_values(&[self.engine_label(), "ok"])
                    .inc();
                stream
            }
            Err(err) => {
                self.metrics
                    .worker_connections_total
                    .with_label_values(&[self.engine_label(), "error"])
                    .inc();
                drop(guard);
                let err =
                    TranslateError::Transport(format!("connect {}: {err}", socket_path.display()));
                self.record_outcome(err.outcome(), started);
                return Err(err);
            }
        };

        let request = WireRequest {
            text,
            source_lang,
            target_lang,
        };
        let (io_budget, caller_clipped) = match deadline {
            Some(d) => {
                let remaining = d.saturating_duration_since(Instant::now());
                (remaining.min(IO_DEADLINE), remaining < IO_DEADLINE)
            }
            None => (IO_DEADLINE, false),
        };

        let result = match tokio::time::timeout(io_budget, wire::exchange(stream, &request)).await
        {
            Ok(Ok(exchange)) => {
                self.metrics
                    .translate_request_bytes
                    .with_label_values(&[self.engine_label()])
                    .observe(exchange.request_bytes as f64);
                self.metrics
                    .translate_response_bytes
                    .with_label_values(&[self.engine_label()])
                    .observe(exchange.response_bytes as f64);
                Ok(exchange.translated)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(if caller_clipped {
                TranslateError::DeadlineExceeded
            } else {
                TranslateError::Transport(format!("no response within {IO_DEADLINE:?}"))
            }),
        };
        drop(guard);

        match &result {
            Ok(_) => self.record_outcome("ok", started),
            Err(err) => self.record_outcome(err.outcome(), started),
        }
        result
    }

    /// Take a valid ready token, racing the caller deadline and the hard
    /// acquisition timeout. Stale tokens (their worker died) are discarded
    /// or refreshed in place and never satisfy the caller.
    async fn acquire(&self, deadline: Option<Instant>) -> Result<ReadyToken, TranslateError> {
        let wait_start = Instant::now();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = self.acquire_inner(deadline, wait_start).await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        self.metrics
            .queue_wait_seconds
            .with_label_values(&[self.engine_label()])
            .observe(wait_start.elapsed().as_secs_f64());
        result
    }

    async fn acquire_inner(
        &self,
        deadline: Option<Instant>,
        wait_start: Instant,
    ) -> Result<ReadyToken, TranslateError> {
        let hard_deadline = wait_start + ACQUIRE_TIMEOUT;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(TranslateError::ShuttingDown);
            }
            if deadline.is_some_and(|d| d <= Instant::now()) {
                return Err(TranslateError::DeadlineExceeded);
            }

            let caller_wait = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d.into()).await,
                    None => std::future::pending().await,
                }
            };

            let token = tokio::select! {
                token = self.recv_ready() => match token {
                    Some(token) => token,
                    None => return Err(TranslateError::ShuttingDown),
                },
                () = tokio::time::sleep_until(hard_deadline.into()) => {
                    return Err(TranslateError::AcquireTimeout(ACQUIRE_TIMEOUT));
                }
                () = caller_wait => return Err(TranslateError::DeadlineExceeded),
                () = self.shutdown.cancelled() => return Err(TranslateError::ShuttingDown),
            };

            let slot = &self.slots[token.id];
            let refreshed = {
                let mut st = slot.state.lock().unwrap();
                if st.epoch == token.epoch && st.alive && !st.busy {
                    st.busy = true;
                    st.last_used = Instant::now();
                    return Ok(token);
                }
                if !st.alive {
                    st.token_out = false;
                    None
                } else if !st.busy {
                    Some(ReadyToken {
                        id: token.id,
                        epoch: st.epoch,
                    })
                } else {
                    None
                }
            };
            if let Some(fresh) = refreshed {
                self.enqueue_ready(fresh);
            }
        }
    }

    async fn recv_ready(&self) -> Option<ReadyToken> {
        let mut rx = self.ready_rx.lock().await;
        rx.recv().await
    }

    fn record_outcome(&self, outcome: &str, started: Instant) {
        self.metrics
            .translate_requests_total
            .with_label_values(&[self.engine_label(), outcome])
            .inc();
        self.metrics
            .translate_duration_seconds
            .with_label_values(&[self.engine_label(), outcome])
            .observe(started.elapsed().as_secs_f64());
    }

    fn sample(&self) {
        let label = self.engine_label();
        let mut active = 0i64;
        let mut busy = 0i64;

        for slot in &self.slots {
            let (alive, is_busy, uptime, pid) = {
                let st = slot.state.lock().unwrap();
                (st.alive, st.busy, st.started_at.elapsed(), st.pid)
            };
            if !alive {
                continue;
            }
            active += 1;
            if is_busy {
                busy += 1;
            }

            let worker_label = slot.id.to_string();
            self.metrics
                .worker_uptime_seconds
                .with_label_values(&[label, &worker_label])
                .set(uptime.as_secs() as i64);
            if let Some(rss) = pid.and_then(read_vm_rss_bytes) {
                self.metrics
                    .worker_memory_bytes
                    .with_label_values(&[label, &worker_label])
                    .set(rss);
            }
        }

        self.metrics
            .pool_workers
            .with_label_values(&[label])
            .set(self.slots.len() as i64);
        self.metrics
            .pool_workers_active
            .with_label_values(&[label])
            .set(active);
        self.metrics
            .pool_workers_busy
            .with_label_values(&[label])
            .set(busy);
        self.metrics
            .pool_workers_idle
            .with_label_values(&[label])
            .set(active - busy);
        self.metrics
            .pool_queue_waiters
            .with_label_values(&[label])
            .set(self.waiters.load(Ordering::SeqCst));
    }
}

/// Clears busy and returns the token to circulation on every exit path of a
/// dispatch. A dead worker's token is handed back to its watcher instead.
struct ReleaseGuard {
    pool: Arc<PoolInner>,
    token: ReadyToken,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let slot = &self.pool.slots[self.token.id];
        let reissue = {
            let mut st = slot.state.lock().unwrap();
            st.busy = false;
            if st.alive {
                Some(ReadyToken {
                    id: self.token.id,
                    epoch: st.epoch,
                })
            } else {
                st.token_out = false;
                None
            }
        };
        if let Some(token) = reissue {
            self.pool.enqueue_ready(token);
        }
    }
}

/// Reaps watcher tasks that stopped outside shutdown and re-issues ready
/// tokens lost to crash/release races.
async fn supervisor_loop(pool: Arc<PoolInner>) {
    let mut tick = tokio::time::interval(SUPERVISOR_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            () = pool.shutdown.cancelled() => return,
        }

        {
            let mut watchers = pool.watchers.lock().await;
            while let Some(res) = watchers.try_join_next() {
                match res {
                    Ok(id) => {
                        warn!(worker_id = id, "worker watcher exited; respawning");
                        watchers.spawn(worker::run_watcher(pool.clone(), id));
                    }
                    Err(err) => warn!("worker watcher task failed: {err}"),
                }
            }
        }

        for slot in &pool.slots {
            let fresh = {
                let mut st = slot.state.lock().unwrap();
                trace!(
                    worker_id = slot.id,
                    alive = st.alive,
                    busy = st.busy,
                    idle_secs = st.last_used.elapsed().as_secs(),
                    "supervisor pass"
                );
                if st.alive && !st.busy && !st.token_out {
                    st.token_out = true;
                    Some(ReadyToken {
                        id: slot.id,
                        epoch: st.epoch,
                    })
                } else {
                    None
                }
            };
            if let Some(token) = fresh {
                pool.enqueue_ready(token);
            }
        }
    }
}

async fn sampler_loop(pool: Arc<PoolInner>) {
    let mut tick = tokio::time::interval(METRICS_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            () = pool.shutdown.cancelled() => return,
        }
        pool.sample();
    }
}

fn read_vm_rss_bytes(pid: u32) -> Option<i64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: i64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
