//! Single-slot cross-thread mailboxes.
//!
//! Each transfer direction between the two worker stages is one
//! [`Mailbox`]: a payload plus an Empty/Full freshness flag behind a
//! dedicated mutex, with a condition variable for the consumer side. The
//! mutex is the only synchronization primitive: payload writes complete
//! inside the critical section before the flag flips, so a consumer can
//! never observe a half-written payload.
//!
//! Semantics are at-most-one-pending-item: publishing over an unread
//! slot overwrites it, so a slow consumer always drains the latest
//! snapshot, never a backlog.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct Slot<T> {
    payload: T,
    fresh: bool,
}

/// A one-slot handoff cell between exactly one producer and one consumer.
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Mailbox<T> {
    /// Create the mailbox around a pre-allocated payload buffer. The
    /// payload is reused in place by every publish, so producers size it
    /// once and overwrite.
    pub fn new(payload: T) -> Self {
        Self {
            slot: Mutex::new(Slot {
                payload,
                fresh: false,
            }),
            ready: Condvar::new(),
        }
    }

    // A poisoned peer has already panicked; keep serving waiters so the
    // surviving stage can still observe the join flag and exit.
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the slot holds unconsumed producer output.
    pub fn is_fresh(&self) -> bool {
        self.lock().fresh
    }

    /// Producer half: write the payload in place, mark it fresh, wake the
    /// consumer. Overwrites an unread slot.
    pub fn publish_with(&self, fill: impl FnOnce(&mut T)) {
        {
            let mut slot = self.lock();
            fill(&mut slot.payload);
            slot.fresh = true;
        }
        self.ready.notify_all();
    }

    /// Consumer half: if the slot is fresh, hand the payload to `drain`,
    /// clear the flag, and return the closure's result. Returns `None`
    /// when there is nothing unconsumed.
    pub fn consume_with<R>(&self, drain: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.lock();
        if !slot.fresh {
            return None;
        }
        let out = drain(&mut slot.payload);
        slot.fresh = false;
        Some(out)
    }

    /// Block until the slot is fresh or `cancelled` reports true.
    ///
    /// Returns `true` when fresh data is available. The predicate is
    /// re-checked on every wakeup, so spurious wakeups are never treated
    /// as signals, and `cancelled` is evaluated inside the wait loop so a
    /// blocked stage can always be released by [`Mailbox::interrupt`].
    pub fn wait_fresh(&self, cancelled: impl Fn() -> bool) -> bool {
        let mut slot = self.lock();
        while !slot.fresh {
            if cancelled() {
                return false;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
        true
    }

    /// Wake every waiter so it can re-evaluate its cancellation flag.
    /// Taking the lock first closes the window where a waiter has checked
    /// the flag but not yet parked.
    pub fn interrupt(&self) {
        let _slot = self.lock();
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn publish_then_consume_round_trips() {
        let mailbox = Mailbox::new(0u32);
        assert!(!mailbox.is_fresh());
        mailbox.publish_with(|v| *v = 7);
        assert!(mailbox.is_fresh());
        assert_eq!(mailbox.consume_with(|v| *v), Some(7));
        assert!(!mailbox.is_fresh());
        assert_eq!(mailbox.consume_with(|v| *v), None);
    }

    #[test]
    fn second_publish_overwrites_unread_slot() {
        let mailbox = Mailbox::new(0u32);
        mailbox.publish_with(|v| *v = 1);
        mailbox.publish_with(|v| *v = 2);
        // No queueing: only the latest payload is observable.
        assert_eq!(mailbox.consume_with(|v| *v), Some(2));
        assert_eq!(mailbox.consume_with(|v| *v), None);
    }

    #[test]
    fn wait_fresh_blocks_until_publish() {
        let mailbox = Arc::new(Mailbox::new(0u64));
        let consumer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                assert!(mailbox.wait_fresh(|| false));
                mailbox.consume_with(|v| *v)
            })
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.publish_with(|v| *v = 42);
        assert_eq!(consumer.join().expect("consumer panicked"), Some(42));
    }

    #[test]
    fn interrupt_releases_blocked_waiter() {
        let mailbox = Arc::new(Mailbox::new(()));
        let cancel = Arc::new(AtomicBool::new(false));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || mailbox.wait_fresh(|| cancel.load(Ordering::SeqCst)))
        };
        thread::sleep(Duration::from_millis(20));
        cancel.store(true, Ordering::SeqCst);
        mailbox.interrupt();
        assert!(!waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn consumer_sees_complete_payload_only() {
        // Hammer the mailbox from a writer that fills a two-field payload
        // whose halves must match; a torn read would surface as a
        // mismatch on the consumer side.
        let mailbox = Arc::new(Mailbox::new((0u64, 0u64)));
        let writer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                for i in 1..=10_000u64 {
                    mailbox.publish_with(|slot| {
                        slot.0 = i;
                        slot.1 = i.wrapping_mul(31);
                    });
                }
            })
        };
        let mut seen = 0u32;
        loop {
            if let Some((a, b)) = mailbox.consume_with(|slot| *slot) {
                assert_eq!(b, a.wrapping_mul(31), "torn payload observed");
                seen += 1;
            }
            if writer.is_finished() && !mailbox.is_fresh() {
                break;
            }
        }
        writer.join().expect("writer panicked");
        assert!(seen > 0, "consumer never observed a payload");
    }
}
