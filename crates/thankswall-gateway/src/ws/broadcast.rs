use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thankswall_core::{ConnId, EventEnvelope};
use thankswall_protocol::frames::BroadcastFrame;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::ws::connection::CloseReason;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::send::SendError;

/// Why a single subscriber missed a broadcast.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    #[error("write failed: {0}")]
    Send(#[from] SendError),

    #[error("write timed out after {ms}ms")]
    Timeout { ms: u64 },
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone)]
pub struct BroadcastReport {
    /// Members in the snapshot the pass started from.
    pub attempted: usize,
    pub delivered: usize,
    /// Connections removed because their write failed.
    pub dropped: Vec<ConnId>,
}

/// Fan-out events to all connected subscribers.
///
/// Each event is serialized once. Passes run one at a time behind `order`,
/// so any connection that sees two events sees them in submission order.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
    order: Mutex<()>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
            order: Mutex::new(()),
        }
    }

    /// Push one event to every subscriber registered when the pass starts.
    ///
    /// Never fails. Subscribers whose write errors or times out are released
    /// and reported in `dropped`; the rest still get the frame. Zero
    /// deliveries is a normal outcome.
    pub async fn broadcast(&self, envelope: &EventEnvelope) -> BroadcastReport {
        let frame = match serde_json::to_string(&BroadcastFrame::from(envelope)) {
            Ok(frame) => frame,
            Err(e) => {
                // not a transport fault: nobody gets dropped for it
                error!(error = %e, kind = %envelope.kind(), "broadcast frame serialization failed");
                return BroadcastReport::default();
            }
        };
        self.broadcast_frame(&frame).await
    }

    /// Fan out an already-serialized frame.
    pub async fn broadcast_frame(&self, frame: &str) -> BroadcastReport {
        let _order = self.order.lock().await;
        let members = self.registry.snapshot();
        if members.is_empty() {
            debug!("broadcast with no subscribers");
            return BroadcastReport::default();
        }

        let outcomes = join_all(members.iter().map(|conn| async move {
            let outcome = match tokio::time::timeout(self.write_timeout, conn.send_text(frame)).await
            {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(DeliveryFailure::Send(e)),
                Err(_) => Err(DeliveryFailure::Timeout {
                    ms: u64::try_from(self.write_timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            };
            (conn, outcome)
        }))
        .await;

        let mut report = BroadcastReport {
            attempted: members.len(),
            ..Default::default()
        };
        for (conn, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    warn!(conn_id = %conn.id(), error = %failure, "dropping subscriber after failed write");
                    self.registry.release(conn, CloseReason::WriteFailed);
                    report.dropped.push(conn.id().clone());
                }
            }
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "broadcast complete"
        );
        report
    }
}

/// Submission side of the dispatcher's worker task.
///
/// Callers enqueue and return at once; one long-lived task drains the queue
/// and runs the fan-out passes back to back, in submission order. A slow
/// subscriber therefore delays later passes, never the HTTP request that
/// produced the event.
#[derive(Clone)]
pub struct BroadcastQueue {
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

impl BroadcastQueue {
    /// Spawn the worker on the current runtime. It stops once every queue
    /// handle has been dropped.
    pub fn spawn(dispatcher: Arc<BroadcastDispatcher>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                dispatcher.broadcast(&envelope).await;
            }
            debug!("broadcast worker stopped");
        });
        Self { tx }
    }

    /// Hand an event to the worker. False when the worker is gone.
    pub fn submit(&self, envelope: EventEnvelope) -> bool {
        match self.tx.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                warn!("broadcast worker is not running, event not delivered");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::{ConnState, Connection};
    use crate::ws::send::testing::RecordingSink;
    use thankswall_core::types::now_utc8;

    fn open_conn(registry: &ConnectionRegistry, sink: Arc<RecordingSink>) -> Arc<Connection> {
        let conn = Connection::new(sink);
        assert!(conn.mark_open());
        assert!(registry.register(Arc::clone(&conn)));
        conn
    }

    fn dispatcher(registry: &Arc<ConnectionRegistry>) -> BroadcastDispatcher {
        BroadcastDispatcher::new(Arc::clone(registry), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn three_subscribers_each_get_one_identical_frame() {
        let registry = Arc::new(ConnectionRegistry::new());
        let sinks: Vec<_> = (0..3).map(|_| Arc::new(RecordingSink::default())).collect();
        for sink in &sinks {
            open_conn(&registry, Arc::clone(sink));
        }

        let env = EventEnvelope::new_message("感恩上帝的恩典", now_utc8());
        let report = dispatcher(&registry).broadcast(&env).await;

        assert_eq!(report.delivered, 3);
        assert!(report.dropped.is_empty());
        assert_eq!(registry.len(), 3);
        for sink in &sinks {
            let frames = sink.frames();
            assert_eq!(frames.len(), 1);
            let v: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
            assert_eq!(v["type"], "new_message");
            assert_eq!(v["data"]["message"], "感恩上帝的恩典");
            assert_eq!(v["data"]["has_image"], false);
        }
    }

    #[tokio::test]
    async fn failing_subscriber_is_dropped_others_delivered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = Arc::new(RecordingSink::default());
        let c = Arc::new(RecordingSink::default());
        open_conn(&registry, Arc::clone(&a));
        let b = open_conn(&registry, Arc::new(RecordingSink::failing()));
        open_conn(&registry, Arc::clone(&c));

        let env = EventEnvelope::new_message("hi", now_utc8());
        let report = dispatcher(&registry).broadcast(&env).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, vec![b.id().clone()]);
        assert_eq!(a.frames().len(), 1);
        assert_eq!(c.frames().len(), 1);
        assert!(!registry.contains(b.id()));
        assert_eq!(registry.len(), 2);
        assert_eq!(b.state(), ConnState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_subscriber_times_out_and_is_dropped() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fast = Arc::new(RecordingSink::default());
        open_conn(&registry, Arc::clone(&fast));
        let slow = open_conn(
            &registry,
            Arc::new(RecordingSink::slow(Duration::from_secs(60))),
        );

        let env = EventEnvelope::new_message("hi", now_utc8());
        let report = dispatcher(&registry).broadcast(&env).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![slow.id().clone()]);
        assert_eq!(fast.frames().len(), 1);
    }

    #[tokio::test]
    async fn disconnected_subscriber_receives_nothing() {
        let registry = Arc::new(ConnectionRegistry::new());
        let gone_sink = Arc::new(RecordingSink::default());
        let gone = open_conn(&registry, Arc::clone(&gone_sink));
        let stays = Arc::new(RecordingSink::default());
        open_conn(&registry, Arc::clone(&stays));

        registry.release(&gone, CloseReason::PeerClosed);
        let env = EventEnvelope::new_message("after", now_utc8());
        let report = dispatcher(&registry).broadcast(&env).await;

        assert_eq!(report.delivered, 1);
        assert!(gone_sink.frames().is_empty());
        assert!(!registry.contains(gone.id()));
    }

    #[tokio::test]
    async fn empty_registry_is_not_an_error() {
        let registry = Arc::new(ConnectionRegistry::new());
        let env = EventEnvelope::new_message("nobody home", now_utc8());
        let report = dispatcher(&registry).broadcast(&env).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn per_connection_order_is_submission_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = Arc::new(RecordingSink::slow(Duration::from_millis(5)));
        open_conn(&registry, Arc::clone(&sink));
        let dispatcher = Arc::new(dispatcher(&registry));

        let e1 = EventEnvelope::new_message("E1", now_utc8());
        let e2 = EventEnvelope::new_message("E2", now_utc8());
        // E1 is issued first; E2 queues behind it on the ordering lock.
        let first = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.broadcast(&e1).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        dispatcher.broadcast(&e2).await;
        first.await.unwrap();

        let messages: Vec<String> = sink
            .frames()
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f).unwrap();
                v["data"]["message"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages, vec!["E1", "E2"]);
    }

    #[tokio::test]
    async fn concurrent_mutation_during_broadcast_is_safe() {
        let registry = Arc::new(ConnectionRegistry::new());
        let slow = Arc::new(RecordingSink::slow(Duration::from_millis(20)));
        let early = open_conn(&registry, Arc::clone(&slow));
        let dispatcher = Arc::new(dispatcher(&registry));

        let pass = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.broadcast(&EventEnvelope::new_message("mid", now_utc8()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let late_sink = Arc::new(RecordingSink::default());
        open_conn(&registry, Arc::clone(&late_sink));
        registry.unregister(early.id());

        let report = pass.await.unwrap();
        assert_eq!(report.attempted, 1);
        assert!(late_sink.frames().is_empty());
        assert_eq!(registry.len(), 1);
    }

    fn message_order(sink: &RecordingSink) -> Vec<String> {
        sink.frames()
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f).unwrap();
                v["data"]["message"].as_str().unwrap().to_string()
            })
            .collect()
    }

    async fn wait_for_frames(sink: &RecordingSink, n: usize) {
        for _ in 0..200 {
            if sink.frames().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sink never received {n} frames");
    }

    #[tokio::test]
    async fn queue_submit_does_not_wait_for_slow_subscriber() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fast = Arc::new(RecordingSink::default());
        open_conn(&registry, Arc::clone(&fast));
        open_conn(
            &registry,
            Arc::new(RecordingSink::slow(Duration::from_secs(30))),
        );
        let queue = BroadcastQueue::spawn(Arc::new(BroadcastDispatcher::new(
            Arc::clone(&registry),
            Duration::from_secs(10),
        )));

        let started = tokio::time::Instant::now();
        assert!(queue.submit(EventEnvelope::new_message("E1", now_utc8())));
        assert!(started.elapsed() < Duration::from_millis(50));

        wait_for_frames(&fast, 1).await;
        assert_eq!(message_order(&fast), vec!["E1"]);
    }

    #[tokio::test]
    async fn queued_events_keep_submission_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = Arc::new(RecordingSink::slow(Duration::from_millis(5)));
        open_conn(&registry, Arc::clone(&sink));
        let queue = BroadcastQueue::spawn(Arc::new(dispatcher(&registry)));

        for msg in ["E1", "E2", "E3"] {
            assert!(queue.submit(EventEnvelope::new_message(msg, now_utc8())));
        }

        wait_for_frames(&sink, 3).await;
        assert_eq!(message_order(&sink), vec!["E1", "E2", "E3"]);
    }
}
