//! Single-consumer relay merging concurrent completions into one stream.
//!
//! Every per-submission task of a batch holds a [`RelaySender`] clone and the
//! fan-out driver holds one more for the terminal [`RelayEvent::Finished`]
//! marker. The coordinator owns the only [`ResultRelay`] and reads it
//! sequentially, so it never observes two events at once.
//!
//! The channel is sized for the batch (one slot per submission plus the
//! marker), so producers never block. Once the relay is closed every send is
//! a silent no-op.

use tokio::sync::mpsc;

use crate::batch::SubmissionOutcome;

/// Event flowing from a running batch to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// One submission of the batch produced its outcome
    Received(SubmissionOutcome),
    /// Every submission of the batch has produced its outcome
    Finished,
}

/// Create a relay able to buffer `capacity` events without blocking producers.
pub fn relay(capacity: usize) -> (RelaySender, ResultRelay) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        RelaySender { tx },
        ResultRelay {
            rx,
            finished: false,
        },
    )
}

/// Producer side of the relay
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<RelayEvent>,
}

impl RelaySender {
    /// Write an event into the relay.
    ///
    /// Returns `false` when the relay has already been closed; the event is
    /// dropped in that case.
    pub async fn send(&self, event: RelayEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    /// Whether the consumer has closed the relay
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the relay
#[derive(Debug)]
pub struct ResultRelay {
    rx: mpsc::Receiver<RelayEvent>,
    finished: bool,
}

impl ResultRelay {
    /// Receive the next event in arrival order.
    ///
    /// Returns `None` after [`RelayEvent::Finished`] has been yielded, after
    /// [`close`](Self::close), or once every producer is gone.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        if self.finished {
            return None;
        }

        let event = self.rx.recv().await?;
        if event == RelayEvent::Finished {
            self.close();
        }
        Some(event)
    }

    /// Close the relay. Buffered events are discarded and later sends fail
    /// immediately. Safe to call more than once.
    pub fn close(&mut self) {
        self.finished = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::SubmissionId;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let (tx, mut relay) = relay(3);
        let first = SubmissionOutcome::success(SubmissionId::new());
        let second = SubmissionOutcome::success(SubmissionId::new());

        assert!(tx.send(RelayEvent::Received(first.clone())).await);
        assert!(tx.send(RelayEvent::Received(second.clone())).await);
        assert!(tx.send(RelayEvent::Finished).await);

        assert_eq!(relay.recv().await, Some(RelayEvent::Received(first)));
        assert_eq!(relay.recv().await, Some(RelayEvent::Received(second)));
        assert_eq!(relay.recv().await, Some(RelayEvent::Finished));
        assert_eq!(relay.recv().await, None);
        assert!(relay.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_is_noop() {
        let (tx, mut relay) = relay(2);
        relay.close();
        relay.close();

        assert!(tx.is_closed());
        assert!(!tx.send(RelayEvent::Finished).await);
        assert_eq!(relay.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_discards_buffered_events() {
        let (tx, mut relay) = relay(2);
        let outcome = SubmissionOutcome::success(SubmissionId::new());
        assert!(tx.send(RelayEvent::Received(outcome)).await);

        relay.close();

        assert_eq!(relay.recv().await, None);
    }

    #[tokio::test]
    async fn test_recv_pending_until_producer_writes() {
        let (tx, mut relay) = relay(1);

        let mut recv = task::spawn(relay.recv());
        assert_pending!(recv.poll());

        assert!(tx.send(RelayEvent::Finished).await);
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(RelayEvent::Finished));
    }

    #[tokio::test]
    async fn test_recv_ends_when_all_producers_drop() {
        let (tx, mut relay) = relay(1);
        drop(tx);
        assert_eq!(relay.recv().await, None);
    }
}
