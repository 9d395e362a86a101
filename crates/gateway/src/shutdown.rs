use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug)]
pub struct ShutdownController {
    forced: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            forced: AtomicU8::new(0),
        }
    }

    pub fn bump_forced(&self) -> u8 {
        self.forced.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// First ctrl-c cancels the token (graceful drain); a second one exits
/// immediately.
pub fn spawn_ctrl_c_handler(shutdown: Arc<ShutdownController>, token: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let n = shutdown.bump_forced();
            if n == 1 {
                info!("stop requested; draining (press ctrl-c again to exit immediately)");
                token.cancel();
            } else {
                info!("stop requested again; exiting immediately");
                std::process::exit(130);
            }
        }
    });
}
