//! Bounded wake hold.

use std::time::Duration;

use tracing::{debug, warn};

use crate::host::{WakeLockHost, WakeToken};

/// Keeps the host awake while a delivery runs.
///
/// The hold is released when the guard drops, on every path out of the
/// delivery. The host is also told `max_hold`, so a hold whose release never
/// runs still expires.
pub struct WakeHold<'a> {
    host: &'a dyn WakeLockHost,
    token: Option<WakeToken>,
    tag: String,
}

impl<'a> WakeHold<'a> {
    /// Try to take a hold. A host that refuses is logged and delivery goes
    /// ahead without one.
    pub fn acquire(host: &'a dyn WakeLockHost, tag: impl Into<String>, max_hold: Duration) -> Self {
        let tag = tag.into();
        let token = match host.acquire(&tag, max_hold) {
            Ok(token) => {
                debug!(tag = %tag, max_hold_secs = max_hold.as_secs(), "wake hold acquired");
                Some(token)
            }
            Err(e) => {
                warn!(tag = %tag, "wake hold unavailable, delivering without it: {e}");
                None
            }
        };
        Self { host, token, tag }
    }

    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }
}

impl Drop for WakeHold<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.host.release(token);
            debug!(tag = %self.tag, "wake hold released");
        }
    }
}
