// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Call timeout scheduling.
//!
//! A single task owns a min-heap of `(deadline, callId)` entries. When the
//! earliest deadline passes, the handler fires; the handler re-checks the
//! live call state, so firing on an already-ended call is a no-op.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use whispertypes::identifiers::CallId;
use whispertypes::time::TimeStamp;

struct Entry {
    call_id: CallId,
    deadline_ms: i64,
}

/// Handle for scheduling timeouts. Cheap to clone.
#[derive(Clone)]
pub struct TimeoutWheel {
    tx: mpsc::UnboundedSender<Entry>,
}

impl TimeoutWheel {
    pub fn new() -> (Self, TimeoutWheelRunner) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, TimeoutWheelRunner { rx })
    }

    pub fn schedule(&self, call_id: CallId, deadline: TimeStamp) {
        // A dropped runner means shutdown; scheduling is best-effort then.
        let _ = self.tx.send(Entry {
            call_id,
            deadline_ms: deadline.as_millis(),
        });
    }
}

/// The task half of the wheel; spawn [`run`](Self::run) at startup.
pub struct TimeoutWheelRunner {
    rx: mpsc::UnboundedReceiver<Entry>,
}

impl TimeoutWheelRunner {
    pub async fn run<F, Fut>(mut self, on_fire: F)
    where
        F: Fn(CallId) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut heap: BinaryHeap<Reverse<(i64, String)>> = BinaryHeap::new();

        loop {
            let sleep = match heap.peek() {
                Some(Reverse((deadline_ms, _))) => {
                    let now_ms = TimeStamp::now().as_millis();
                    Duration::from_millis((deadline_ms - now_ms).max(0) as u64)
                }
                // Nothing scheduled; park until a new entry arrives.
                None => Duration::from_secs(3600),
            };

            tokio::select! {
                entry = self.rx.recv() => {
                    match entry {
                        Some(entry) => {
                            heap.push(Reverse((entry.deadline_ms, entry.call_id.to_string())));
                        }
                        // All handles dropped: shut down.
                        None => return,
                    }
                }
                _ = tokio::time::sleep(sleep), if !heap.is_empty() => {
                    let now_ms = TimeStamp::now().as_millis();
                    while let Some(Reverse((deadline_ms, _))) = heap.peek() {
                        if *deadline_ms > now_ms {
                            break;
                        }
                        let Some(Reverse((_, call_id))) = heap.pop() else {
                            break;
                        };
                        debug!(call_id = %call_id, "call deadline fired");
                        on_fire(CallId::new(call_id)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn fires_after_deadline() {
        let (wheel, runner) = TimeoutWheel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        tokio::spawn(runner.run(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let soon = TimeStamp::from_millis(TimeStamp::now().as_millis() + 50).unwrap();
        wheel.schedule(CallId::from("k1"), soon);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_fire_early() {
        let (wheel, runner) = TimeoutWheel::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        tokio::spawn(runner.run(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        let later = TimeStamp::from_millis(TimeStamp::now().as_millis() + 60_000).unwrap();
        wheel.schedule(CallId::from("k2"), later);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
