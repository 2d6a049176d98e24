//! Process liveness as observed by the publisher.
//!
//! One atomic flag: the most recent publish attempt decides it. The handle is
//! cloned into the publisher (writer) and into health checks (readers).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Liveness {
    healthy: Arc<AtomicBool>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Starts healthy.
    pub fn new() -> Self {
        Self {
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    #[inline]
    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Release);
    }

    #[inline]
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(outcomes: &[bool]) -> Liveness {
        let liveness = Liveness::new();
        for ok in outcomes {
            if *ok {
                liveness.mark_healthy();
            } else {
                liveness.mark_unhealthy();
            }
        }
        liveness
    }

    #[test]
    fn last_outcome_wins() {
        assert!(!apply(&[false, true, false]).is_healthy());
        assert!(apply(&[false, true]).is_healthy());
        assert!(apply(&[]).is_healthy());
    }

    #[test]
    fn clones_share_state() {
        let writer = Liveness::new();
        let reader = writer.clone();
        writer.mark_unhealthy();
        assert!(!reader.is_healthy());
    }
}
