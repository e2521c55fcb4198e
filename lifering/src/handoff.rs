/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Generation-indexed single-slot handoff.
//!
//! One [`Handoff`] carries one kind of per-generation artifact between exactly
//! one producer and exactly one consumer.  Each value is tagged with the
//! generation it belongs to, and the consumer names the generation it expects,
//! so a collector that is one generation ahead or behind fails loudly with
//! [`HandoffError::Mismatch`] / [`HandoffError::AlreadyTaken`] instead of
//! silently receiving the wrong generation's data.
//!
//! | Producer call | Blocks until |
//! |---|---|
//! | [`publish`](Handoff::publish) | the consumer has taken the value |
//! | [`deliver`](Handoff::deliver) | never (slot must be free) |
//!
//! | Consumer call | Blocks until |
//! |---|---|
//! | [`take`](Handoff::take) | a value for the requested generation is present |

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("{kind}: expected generation {expected}, slot holds generation {found}")]
    Mismatch {
        kind: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("{kind}: generation {turn} was already taken (last taken: {last})")]
    AlreadyTaken {
        kind: &'static str,
        turn: u32,
        last: u32,
    },

    #[error("{kind}: slot still holds generation {pending}, cannot deposit generation {turn}")]
    Occupied {
        kind: &'static str,
        pending: u32,
        turn: u32,
    },

    #[error("{kind}: handoff closed")]
    Closed { kind: &'static str },
}

struct Slot<T> {
    pending: Option<(u32, T)>,
    last_taken: u32,
    closed: bool,
}

/// Single-slot rendezvous keyed by generation number.
pub struct Handoff<T> {
    kind: &'static str,
    slot: Mutex<Slot<T>>,
    changed: Notify,
}

impl<T> Handoff<T> {
    /// `kind` names the artifact in errors and logs.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slot: Mutex::new(Slot {
                pending: None,
                last_taken: 0,
                closed: false,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deposit `value` for generation `turn` without waiting for it to be
    /// taken.
    pub fn deliver(&self, turn: u32, value: T) -> Result<(), HandoffError> {
        {
            let mut slot = self.lock();
            self.check_deposit(&slot, turn)?;
            slot.pending = Some((turn, value));
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Deposit `value` for generation `turn` and wait until the consumer has
    /// taken it.
    ///
    /// If the handoff is closed while waiting the value is discarded and
    /// [`HandoffError::Closed`] is returned.
    pub async fn publish(&self, turn: u32, value: T) -> Result<(), HandoffError> {
        self.deliver(turn, value)?;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut slot = self.lock();
                if slot.last_taken >= turn {
                    return Ok(());
                }
                if slot.closed {
                    slot.pending = None;
                    return Err(HandoffError::Closed { kind: self.kind });
                }
            }
            notified.await;
        }
    }

    /// Wait for the value of generation `turn` and take it.
    pub async fn take(&self, turn: u32) -> Result<T, HandoffError> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut slot = self.lock();
                if turn <= slot.last_taken {
                    return Err(HandoffError::AlreadyTaken {
                        kind: self.kind,
                        turn,
                        last: slot.last_taken,
                    });
                }
                let pending = slot.pending.take();
                match pending {
                    Some((found, value)) if found == turn => {
                        slot.last_taken = turn;
                        drop(slot);
                        self.changed.notify_waiters();
                        return Ok(value);
                    }
                    Some((found, value)) => {
                        slot.pending = Some((found, value));
                        return Err(HandoffError::Mismatch {
                            kind: self.kind,
                            expected: turn,
                            found,
                        });
                    }
                    None if slot.closed => {
                        return Err(HandoffError::Closed { kind: self.kind });
                    }
                    None => {}
                }
            }
            notified.await;
        }
    }

    /// Clear any pending value and restart the generation count at zero.
    /// Called when a node is assigned a new partition.
    pub fn reset(&self) {
        {
            let mut slot = self.lock();
            slot.pending = None;
            slot.last_taken = 0;
            slot.closed = false;
        }
        self.changed.notify_waiters();
    }

    /// Wake every waiter with [`HandoffError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_waiters();
    }

    fn check_deposit(&self, slot: &Slot<T>, turn: u32) -> Result<(), HandoffError> {
        if slot.closed {
            return Err(HandoffError::Closed { kind: self.kind });
        }
        if let Some((pending, _)) = &slot.pending {
            return Err(HandoffError::Occupied {
                kind: self.kind,
                pending: *pending,
                turn,
            });
        }
        if turn <= slot.last_taken {
            return Err(HandoffError::AlreadyTaken {
                kind: self.kind,
                turn,
                last: slot.last_taken,
            });
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn take_waits_for_matching_generation() {
        let h = Arc::new(Handoff::<u64>::new("alive"));
        let consumer = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.take(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.deliver(1, 42).unwrap();
        assert_eq!(consumer.await.unwrap(), Ok(42));
    }

    #[tokio::test]
    async fn publish_blocks_until_taken() {
        let h = Arc::new(Handoff::<&'static str>::new("flipped"));
        let producer = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.publish(1, "gen-1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "publish must wait for the consumer");

        assert_eq!(h.take(1).await, Ok("gen-1"));
        assert_eq!(producer.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn generations_flow_in_order() {
        let h = Arc::new(Handoff::<u32>::new("halo"));
        let producer = {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                for turn in 1..=5 {
                    h.publish(turn, turn * 10).await?;
                }
                Ok::<_, HandoffError>(())
            })
        };
        for turn in 1..=5 {
            assert_eq!(h.take(turn).await, Ok(turn * 10));
        }
        producer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wrong_generation_is_a_mismatch_and_keeps_the_value() {
        let h = Handoff::<u32>::new("alive");
        h.deliver(2, 7).unwrap();
        assert_eq!(
            h.take(3).await,
            Err(HandoffError::Mismatch {
                kind: "alive",
                expected: 3,
                found: 2
            })
        );
        assert_eq!(h.take(2).await, Ok(7));
    }

    #[tokio::test]
    async fn taking_an_old_generation_fails() {
        let h = Handoff::<u32>::new("alive");
        h.deliver(1, 1).unwrap();
        h.take(1).await.unwrap();
        assert!(matches!(h.take(1).await, Err(HandoffError::AlreadyTaken { turn: 1, .. })));
    }

    #[test]
    fn deliver_into_occupied_slot_fails() {
        let h = Handoff::<u32>::new("halo");
        h.deliver(1, 1).unwrap();
        assert_eq!(
            h.deliver(2, 2),
            Err(HandoffError::Occupied {
                kind: "halo",
                pending: 1,
                turn: 2
            })
        );
    }

    #[tokio::test]
    async fn close_wakes_consumer_and_producer() {
        let h = Arc::new(Handoff::<u32>::new("halo"));
        let consumer = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.take(1).await })
        };
        let other = Arc::new(Handoff::<u32>::new("alive"));
        let producer = {
            let other = Arc::clone(&other);
            tokio::spawn(async move { other.publish(1, 9).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.close();
        other.close();
        assert_eq!(consumer.await.unwrap(), Err(HandoffError::Closed { kind: "halo" }));
        assert_eq!(producer.await.unwrap(), Err(HandoffError::Closed { kind: "alive" }));
    }

    #[tokio::test]
    async fn reset_restarts_generation_count() {
        let h = Handoff::<u32>::new("halo");
        h.deliver(1, 1).unwrap();
        h.take(1).await.unwrap();
        h.deliver(2, 2).unwrap();

        h.reset();
        h.deliver(1, 10).unwrap();
        assert_eq!(h.take(1).await, Ok(10));
    }
}
