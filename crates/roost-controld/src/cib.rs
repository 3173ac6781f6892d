// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The CIB collaborator seam.
//!
//! The controller owns no durable state; everything lives in the CIB
//! behind [`CibStore`]. Writes use optimistic concurrency on the
//! `admin_epoch/epoch/num_updates` triple: a conflicting write is
//! rejected and the caller requeues a fresh read-compute-write cycle,
//! backing off exponentially up to a cap.

use std::sync::Mutex;
use std::time::Duration;

use roost_core::EpochTriple;
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by a CIB store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CibError {
    /// The expected epoch no longer matches; re-read and recompute.
    #[error("write conflict: expected {expected:?}, store has {actual:?}")]
    Conflict {
        /// Epoch the writer computed against.
        expected: EpochTriple,
        /// Epoch currently in the store.
        actual: EpochTriple,
    },
    /// Retries exhausted without a successful write.
    #[error("write retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// The configuration store the controller reads and writes.
pub trait CibStore: Send + Sync {
    /// Returns the current epoch and document.
    fn snapshot(&self) -> (EpochTriple, String);

    /// Writes a new document iff the store still carries `expected`.
    /// On success the store bumps `num_updates` and notifies subscribers.
    fn compare_and_write(&self, expected: EpochTriple, xml: String)
        -> Result<EpochTriple, CibError>;

    /// Change notifications: receivers observe the epoch after each write.
    fn watch(&self) -> watch::Receiver<EpochTriple>;
}

/// In-memory CIB for tests and single-node bring-up.
pub struct MemCib {
    state: Mutex<(EpochTriple, String)>,
    tx: watch::Sender<EpochTriple>,
}

impl MemCib {
    /// Creates a store seeded with the given document at epoch zero.
    #[must_use]
    pub fn new(xml: &str) -> Self {
        let epoch = EpochTriple::default();
        let (tx, _) = watch::channel(epoch);
        Self {
            state: Mutex::new((epoch, xml.to_string())),
            tx,
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, (EpochTriple, String)> {
        // Lock poisoning only happens if a writer panicked; the data is a
        // plain (epoch, document) pair and stays usable.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CibStore for MemCib {
    fn snapshot(&self) -> (EpochTriple, String) {
        self.locked().clone()
    }

    fn compare_and_write(
        &self,
        expected: EpochTriple,
        xml: String,
    ) -> Result<EpochTriple, CibError> {
        let mut state = self.locked();
        if state.0 != expected {
            return Err(CibError::Conflict {
                expected,
                actual: state.0,
            });
        }
        let next = EpochTriple {
            admin_epoch: expected.admin_epoch,
            epoch: expected.epoch,
            num_updates: expected.num_updates + 1,
        };
        *state = (next, xml);
        drop(state);
        let _ = self.tx.send(next);
        Ok(next)
    }

    fn watch(&self) -> watch::Receiver<EpochTriple> {
        self.tx.subscribe()
    }
}

/// Exponential backoff schedule for transient I/O retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a schedule starting at `base` and doubling up to `cap`.
    #[must_use]
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Returns the next delay and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(16);
        self.attempt += 1;
        let delay = self.base.saturating_mul(1 << shift);
        delay.min(self.cap)
    }

    /// Attempts consumed so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// Read-compute-write with conflict retry.
///
/// `compute` receives the current document and returns the replacement.
/// A conflict triggers a fresh read and a backoff sleep; after
/// `max_attempts` the error surfaces to the caller.
pub async fn write_with_retry<F>(
    store: &dyn CibStore,
    mut compute: F,
    max_attempts: u32,
) -> Result<EpochTriple, CibError>
where
    F: FnMut(&str) -> String,
{
    let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(2));
    loop {
        let (epoch, doc) = store.snapshot();
        let next = compute(&doc);
        match store.compare_and_write(epoch, next) {
            Ok(written) => return Ok(written),
            Err(CibError::Conflict { .. }) if backoff.attempts() + 1 < max_attempts => {
                let delay = backoff.next_delay();
                tracing::debug!(
                    attempt = backoff.attempts(),
                    ?delay,
                    event = "cib-write-conflict",
                    "requeueing read-compute-write"
                );
                tokio::time::sleep(delay).await;
            }
            Err(CibError::Conflict { .. }) => {
                return Err(CibError::RetriesExhausted {
                    attempts: backoff.attempts() + 1,
                })
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_and_write_bumps_num_updates() {
        let cib = MemCib::new("<cib/>");
        let (epoch, _) = cib.snapshot();
        let next = cib
            .compare_and_write(epoch, "<cib epoch='1'/>".into())
            .expect("clean write");
        assert_eq!(next.num_updates, epoch.num_updates + 1);
    }

    #[test]
    fn stale_writes_conflict() {
        let cib = MemCib::new("<cib/>");
        let (stale, _) = cib.snapshot();
        cib.compare_and_write(stale, "<cib v='1'/>".into())
            .expect("first write");
        let err = cib
            .compare_and_write(stale, "<cib v='2'/>".into())
            .expect_err("second write is stale");
        assert!(matches!(err, CibError::Conflict { .. }));
    }

    #[test]
    fn watchers_observe_writes() {
        let cib = MemCib::new("<cib/>");
        let rx = cib.watch();
        let (epoch, _) = cib.snapshot();
        let written = cib
            .compare_and_write(epoch, "<cib v='1'/>".into())
            .expect("write");
        assert_eq!(*rx.borrow(), written);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        assert_eq!(backoff.next_delay(), Duration::from_millis(40));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50), "capped");
    }

    #[tokio::test]
    async fn write_with_retry_recovers_from_one_conflict() {
        let cib = MemCib::new("<cib/>");
        // Sabotage the first snapshot by writing between read and write.
        let (epoch, _) = cib.snapshot();
        cib.compare_and_write(epoch, "<cib sneak='1'/>".into())
            .expect("interfering write");
        let result = write_with_retry(&cib, |_doc| "<cib final='1'/>".into(), 5).await;
        assert!(result.is_ok());
        assert!(cib.snapshot().1.contains("final"));
    }
}
