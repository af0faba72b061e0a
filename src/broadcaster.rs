//! Fan-out of a session's events to zero or more concurrent subscribers.
//!
//! `append` acquires the session lock only long enough to push onto history
//! and snapshot the subscriber list (see `session::SessionHandle::append`);
//! this module's `Broadcaster` itself holds no lock across an enqueue, so a
//! slow subscriber can never block the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::event::Event;

/// Why a subscriber's channel closed, needed by the SSE gateway to pick the
/// right closing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session reached a terminal status; all history has been sent.
    Terminal,
    /// The subscriber's queue filled up and was evicted.
    DroppedForSlowness,
}

pub struct Subscriber {
    pub rx: mpsc::Receiver<Arc<Event>>,
    evicted: Arc<AtomicBool>,
}

impl Subscriber {
    /// Polls the next event, or `None` once the channel has closed — with
    /// the reason recorded in `close_reason()` distinguishing a clean
    /// terminal close from an eviction.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }

    pub fn close_reason(&self) -> CloseReason {
        if self.evicted.load(Ordering::Acquire) {
            CloseReason::DroppedForSlowness
        } else {
            CloseReason::Terminal
        }
    }
}

struct Handle {
    tx: mpsc::Sender<Arc<Event>>,
    evicted: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct Broadcaster {
    subscribers: Mutex<Vec<Handle>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Registers a fresh subscriber. Callers are expected to have already
    /// replayed history `> from_seq` to the returned handle's consumer
    /// before treating it as live (the gateway does this by sending the
    /// replay segment directly, outside the broadcaster).
    pub fn subscribe(&self) -> Subscriber {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));
        let evicted = Arc::new(AtomicBool::new(false));
        self.subscribers.lock().unwrap().push(Handle {
            tx,
            evicted: evicted.clone(),
        });
        Subscriber { rx, evicted }
    }

    /// Non-blocking fan-out of one event to every currently registered
    /// subscriber. A full queue evicts its subscriber rather than block.
    pub fn publish(&self, event: Arc<Event>) {
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|h| match h.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                h.evicted.store(true, Ordering::Release);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Drops every subscriber's sender, closing their channels cleanly
    /// (`close_reason()` reports `Terminal` since `evicted` was never set).
    pub fn close_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn evt(seq: u64) -> Arc<Event> {
        Arc::new(Event::new(seq, 0, EventKind::Keepalive {}))
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let b = Broadcaster::new(8);
        let mut s1 = b.subscribe();
        let mut s2 = b.subscribe();
        b.publish(evt(1));
        assert_eq!(s1.recv().await.unwrap().seq, 1);
        assert_eq!(s2.recv().await.unwrap().seq, 1);
    }

    #[tokio::test]
    async fn full_queue_evicts_without_blocking() {
        let b = Broadcaster::new(2);
        let mut slow = b.subscribe();
        for i in 1..=5u64 {
            b.publish(evt(i));
        }
        // The subscriber is now evicted; at most `capacity` events remain
        // buffered for it to drain.
        let mut received = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), slow.recv()).await
        {
            received += 1;
        }
        assert!(received <= 2);
        assert_eq!(slow.close_reason(), CloseReason::DroppedForSlowness);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_all_reports_terminal() {
        let b = Broadcaster::new(8);
        let mut s = b.subscribe();
        b.close_all();
        assert!(s.recv().await.is_none());
        assert_eq!(s.close_reason(), CloseReason::Terminal);
    }
}
