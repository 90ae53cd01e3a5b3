//! Serialized delivery of recovered events
//!
//! A single worker task owns the receiving end of an unbounded channel and
//! drives the handler's `on_output` for one event at a time, so event N+1 is
//! never started before event N has settled. `settled()` enqueues a barrier
//! behind everything submitted so far and resolves when the worker reaches it.

use super::error::{DeliveryError, DeliveryFailure};
use super::handler::OutputHandler;
use super::types::ContainerOutputEvent;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

enum Job {
    Deliver(ContainerOutputEvent),
    Barrier(oneshot::Sender<Vec<DeliveryFailure>>),
}

/// FIFO queue of delivery callback invocations
///
/// There is no backpressure: a slow handler lets recovered events accumulate
/// in memory. `pending()` exposes the current depth for monitoring.
pub struct DeliveryQueue {
    sender: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl DeliveryQueue {
    /// Start the worker task; must be called from within a tokio runtime
    pub fn spawn(handler: Arc<dyn OutputHandler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_worker(handler, receiver, Arc::clone(&pending)));
        Self { sender, pending }
    }

    /// Queue one event for delivery after all previously queued ones
    pub fn enqueue(&self, event: ContainerOutputEvent) {
        let sequence = event.sequence;
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(Job::Deliver(event)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!(sequence, "Delivery worker is gone; output event dropped");
        }
    }

    /// Future that resolves once every delivery queued before this call has completed
    ///
    /// Failures recorded since the previous call are returned as
    /// [`DeliveryError::Failed`]; each failure is reported exactly once.
    pub fn settled(&self) -> impl Future<Output = Result<(), DeliveryError>> + Send + 'static {
        let (done, wait) = oneshot::channel();
        let queued = self.sender.send(Job::Barrier(done)).is_ok();

        async move {
            if !queued {
                return Err(DeliveryError::WorkerGone);
            }
            match wait.await {
                Ok(failures) if failures.is_empty() => Ok(()),
                Ok(failures) => Err(DeliveryError::Failed { failures }),
                Err(_) => Err(DeliveryError::WorkerGone),
            }
        }
    }

    /// Deliveries queued but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

async fn run_worker(
    handler: Arc<dyn OutputHandler>,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    pending: Arc<AtomicUsize>,
) {
    let mut failures: Vec<DeliveryFailure> = Vec::new();

    while let Some(job) = receiver.recv().await {
        match job {
            Job::Deliver(event) => {
                let sequence = event.sequence;
                let outcome = AssertUnwindSafe(handler.on_output(event))
                    .catch_unwind()
                    .await;
                pending.fetch_sub(1, Ordering::SeqCst);

                match outcome {
                    Ok(Ok(())) => debug!(sequence, "Output event delivered"),
                    Ok(Err(e)) => {
                        warn!(sequence, "Output delivery failed: {:#}", e);
                        failures.push(DeliveryFailure {
                            sequence,
                            message: format!("{e:#}"),
                            panicked: false,
                        });
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        error!(sequence, "Output delivery panicked: {}", message);
                        failures.push(DeliveryFailure {
                            sequence,
                            message,
                            panicked: true,
                        });
                    }
                }
            }
            Job::Barrier(done) => {
                // Receiver may have been dropped; the failures are then logged below
                if let Err(unreported) = done.send(std::mem::take(&mut failures)) {
                    failures = unreported;
                }
            }
        }
    }

    for failure in &failures {
        error!("Unreported delivery failure at shutdown: {}", failure);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::streaming::FnOutputHandler;
    use serde_json::Map;
    use std::sync::Mutex;
    use std::time::Duration;

    fn event(sequence: u64) -> ContainerOutputEvent {
        ContainerOutputEvent::new(sequence, Map::new())
    }

    #[tokio::test]
    async fn test_deliveries_run_one_at_a_time_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let handler = {
            let log = Arc::clone(&log);
            let in_flight = Arc::clone(&in_flight);
            FnOutputHandler::new(move |event| {
                let log = Arc::clone(&log);
                let in_flight = Arc::clone(&in_flight);
                async move {
                    assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                    // Earlier events sleep longer; ordering must still hold
                    tokio::time::sleep(Duration::from_millis(10 - event.sequence * 3)).await;
                    log.lock().unwrap().push(event.sequence);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };

        let queue = DeliveryQueue::spawn(Arc::new(handler));
        for seq in 0..3 {
            queue.enqueue(event(seq));
        }
        queue.settled().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_failures_reported_once_and_queue_continues() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let delivered = Arc::clone(&delivered);
            FnOutputHandler::new(move |event| {
                let delivered = Arc::clone(&delivered);
                async move {
                    if event.sequence == 1 {
                        anyhow::bail!("router unavailable");
                    }
                    delivered.lock().unwrap().push(event.sequence);
                    Ok(())
                }
            })
        };

        let queue = DeliveryQueue::spawn(Arc::new(handler));
        for seq in 0..3 {
            queue.enqueue(event(seq));
        }

        let err = queue.settled().await.unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(err.failures()[0].sequence, 1);
        assert!(err.failures()[0].message.contains("router unavailable"));
        assert_eq!(*delivered.lock().unwrap(), vec![0, 2]);

        // Already reported
        assert!(queue.settled().await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_delivery_is_contained() {
        let handler = FnOutputHandler::new(|event| async move {
            if event.sequence == 0 {
                panic!("handler bug");
            }
            Ok(())
        });

        let queue = DeliveryQueue::spawn(Arc::new(handler));
        queue.enqueue(event(0));
        queue.enqueue(event(1));

        let err = queue.settled().await.unwrap_err();
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].panicked);
        assert_eq!(failures[0].message, "handler bug");
    }

    #[tokio::test]
    async fn test_settled_on_empty_queue() {
        let queue = DeliveryQueue::spawn(Arc::new(FnOutputHandler::new(|_| async { Ok(()) })));
        assert!(queue.settled().await.is_ok());
    }
}
