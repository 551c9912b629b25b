//! Local port allocation for preview processes.
//!
//! A port is handed out only if it is not claimed by another live
//! deployment in this process and a bind probe on `127.0.0.1` succeeds at
//! allocation time. The probe listener is dropped immediately, so another
//! program can still grab the port before the preview binds it; that
//! window is accepted.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{Mutex, PoisonError};

use rand::Rng;

use crate::config::PortRange;
use crate::error::{PreviewError, Result};

pub struct PortAllocator {
    range: PortRange,
    attempts: u32,
    claimed: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: PortRange, attempts: u32) -> Self {
        Self {
            range,
            attempts: attempts.max(1),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Pick a random free port from the range and claim it.
    pub fn allocate(&self) -> Result<u16> {
        if self.range.is_empty() {
            return Err(PreviewError::PortExhausted { attempts: 0 });
        }
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = rand::thread_rng();
        for _ in 0..self.attempts {
            let port = rng.gen_range(self.range.start..self.range.end);
            if claimed.contains(&port) {
                continue;
            }
            if probe(port) {
                claimed.insert(port);
                return Ok(port);
            }
            tracing::debug!(port, "port busy, retrying");
        }
        Err(PreviewError::PortExhausted {
            attempts: self.attempts,
        })
    }

    /// Claim a specific port (Recovery re-taking a recorded port).
    /// Returns false if it is claimed here or bound by someone else.
    pub fn claim(&self, port: u16) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.contains(&port) || !probe(port) {
            return false;
        }
        claimed.insert(port);
        true
    }

    pub fn release(&self, port: u16) {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&port);
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&port)
    }
}

fn probe(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
