use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::Clock;

pub fn should_skip_httpmock() -> bool {
    if can_bind_localhost() {
        return false;
    }
    eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
    true
}

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

/// Test clock advanced by hand, for driving window and TTL expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_epoch_seconds: u64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicU64::new(now_epoch_seconds),
        })
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
