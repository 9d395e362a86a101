//! One translator worker: a supervised subprocess listening on its own
//! rendezvous socket, plus the watcher task that restarts it forever.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::api::PoolConfig;

/// How long the pool waits for a freshly spawned worker to create its
/// rendezvous socket.
pub(crate) const STARTUP_WAIT: Duration = Duration::from_millis(100);

/// Pause between restart attempts after a worker dies.
pub(crate) const RESTART_BACKOFF: Duration = Duration::from_secs(1);

/// Ticket granting one request against one worker. Tokens whose epoch no
/// longer matches the slot's are stale: the subprocess behind them died.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadyToken {
    pub(crate) id: usize,
    pub(crate) epoch: u64,
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) alive: bool,
    pub(crate) busy: bool,
    /// Bumped every time the subprocess dies; stale ready tokens carry the
    /// previous value.
    pub(crate) epoch: u64,
    /// Whether a ready token for this slot exists (queued or held). At most
    /// one token per slot, ever.
    pub(crate) token_out: bool,
    pub(crate) pid: Option<u32>,
    pub(crate) last_used: Instant,
    pub(crate) started_at: Instant,
}

#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub(crate) id: usize,
    pub(crate) socket_path: PathBuf,
    pub(crate) state: Mutex<SlotState>,
}

impl WorkerSlot {
    pub(crate) fn new(id: usize, rendezvous_dir: &std::path::Path) -> Self {
        Self {
            id,
            socket_path: rendezvous_dir.join(format!("worker-{id}.sock")),
            state: Mutex::new(SlotState {
                alive: false,
                busy: false,
                epoch: 0,
                token_out: false,
                pid: None,
                last_used: Instant::now(),
                started_at: Instant::now(),
            }),
        }
    }

    /// Records a successful start and returns the ready token to enqueue,
    /// unless one for this slot is already in circulation.
    pub(crate) fn mark_started(&self, pid: Option<u32>) -> Option<ReadyToken> {
        let mut st = self.state.lock().unwrap();
        st.alive = true;
        st.busy = false;
        st.pid = pid;
        st.started_at = Instant::now();
        if st.token_out {
            return None;
        }
        st.token_out = true;
        Some(ReadyToken {
            id: self.id,
            epoch: st.epoch,
        })
    }

    /// Records subprocess death: clears busy before any restart and
    /// invalidates outstanding tokens.
    pub(crate) fn mark_dead(&self) {
        let mut st = self.state.lock().unwrap();
        st.alive = false;
        st.busy = false;
        st.pid = None;
        st.epoch += 1;
    }
}

/// Spawn the worker subprocess and verify it created its socket.
pub(crate) async fn spawn_worker(config: &PoolConfig, slot: &WorkerSlot) -> anyhow::Result<Child> {
    match tokio::fs::remove_file(&slot.socket_path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).with_context(|| {
                format!("remove stale socket {}", slot.socket_path.display())
            });
        }
    }

    let mut cmd = Command::new(&config.worker_command);
    if let Some(script) = &config.worker_script {
        cmd.arg(script);
    }
    cmd.arg(&slot.socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn worker command {:?}", config.worker_command))?;

    if let Some(stderr) = child.stderr.take() {
        let worker_id = slot.id;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: "iskoces::worker", worker_id, "{line}");
            }
        });
    }

    tokio::time::sleep(STARTUP_WAIT).await;
    if tokio::fs::metadata(&slot.socket_path).await.is_err() {
        let _ = child.kill().await;
        anyhow::bail!(
            "worker {} did not create {} within {:?}",
            slot.id,
            slot.socket_path.display(),
            STARTUP_WAIT
        );
    }

    Ok(child)
}

/// Supervise one slot forever: spawn, publish readiness, block on exit,
/// back off, retry. Returns the slot id when the pool shuts down.
pub(crate) async fn run_watcher(pool: std::sync::Arc<crate::pool::PoolInner>, slot_id: usize) -> usize {
    let slot = &pool.slots[slot_id];
    let worker_label = slot_id.to_string();

    loop {
        if pool.shutdown.is_cancelled() {
            break;
        }

        let mut child = match spawn_worker(&pool.config, slot).await {
            Ok(child) => child,
            Err(err) => {
                warn!(worker_id = slot_id, "worker startup failed: {err:#}");
                if backoff_or_shutdown(&pool).await {
                    break;
                }
                continue;
            }
        };

        let token = slot.mark_started(child.id());
        pool.metrics
            .worker_starts_total
            .with_label_values(&[pool.engine_label(), &worker_label])
            .inc();
        info!(
            worker_id = slot_id,
            socket = %slot.socket_path.display(),
            "translator worker ready"
        );
        if let Some(token) = token {
            pool.enqueue_ready(token);
        }

        let exit = tokio::select! {
            status = child.wait() => Some(status),
            () = pool.shutdown.cancelled() => None,
        };
        match exit {
            Some(status) => {
                slot.mark_dead();
                pool.metrics
                    .worker_restarts_total
                    .with_label_values(&[pool.engine_label(), &worker_label])
                    .inc();
                match status {
                    Ok(status) => warn!(worker_id = slot_id, %status, "translator worker exited; restarting"),
                    Err(err) => warn!(worker_id = slot_id, "translator worker wait failed: {err}; restarting"),
                }
                if backoff_or_shutdown(&pool).await {
                    break;
                }
            }
            None => {
                let _ = child.kill().await;
                break;
            }
        }
    }

    slot.mark_dead();
    let _ = tokio::fs::remove_file(&slot.socket_path).await;
    slot_id
}

/// Sleep out the restart backoff; true means shutdown arrived instead.
async fn backoff_or_shutdown(pool: &crate::pool::PoolInner) -> bool {
    tokio::select! {
        () = tokio::time::sleep(RESTART_BACKOFF) => false,
        () = pool.shutdown.cancelled() => true,
    }
}
