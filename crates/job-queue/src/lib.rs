//! Job Queue: a bounded FIFO with exactly one Worker, each job correlated
//! to its producer by a `tokio::oneshot` reply handed out at enqueue time.
//!
//! The vendor reference tool polls a shared `response_map` dict guarded by
//! a lock (`spec.md` §9 "Correlation-map polling"). This replaces that with
//! a channel/future handed to the producer directly, so there is nothing to
//! poll and nothing to leak if the producer stops waiting.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

pub type JobId = Uuid;

struct Envelope<Req, Resp> {
    id: JobId,
    payload: Req,
    reply: oneshot::Sender<Resp>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job queue is closed (no Worker is running)")]
    Closed,
    #[error("the Worker dropped this job's reply before completing it")]
    ResultLost,
}

/// The producer-facing handle. Cheap to clone — every front-end (HTTP,
/// pub/sub) holds one.
pub struct Queue<Req, Resp> {
    sender: mpsc::Sender<Envelope<Req, Resp>>,
}

impl<Req, Resp> Clone for Queue<Req, Resp> {
    fn clone(&self) -> Self {
        Queue {
            sender: self.sender.clone(),
        }
    }
}

impl<Req, Resp> Queue<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create a bounded queue and its single `Worker`. `capacity` bounds
    /// how many jobs may be outstanding before `enqueue_and_wait` itself
    /// starts to block — a deliberate backpressure point, not a queue that
    /// grows without limit.
    pub fn new(capacity: usize) -> (Self, Worker<Req, Resp>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Queue { sender }, Worker { receiver })
    }

    /// Enqueue `payload` and wait for the Worker's result.
    ///
    /// If the caller stops polling this future (e.g. it times out at a
    /// higher layer and is dropped), the Worker still completes the job —
    /// the reply send then simply fails and is discarded; nothing leaks
    /// and nothing double-delivers.
    pub async fn enqueue_and_wait(&self, payload: Req) -> Result<Resp, QueueError> {
        let (reply, reply_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        self.sender
            .send(Envelope { id, payload, reply })
            .await
            .map_err(|_| QueueError::Closed)?;
        reply_rx.await.map_err(|_| QueueError::ResultLost)
    }
}

/// The single consumer. Dropping `Worker` without calling `run` closes the
/// queue for every producer.
pub struct Worker<Req, Resp> {
    receiver: mpsc::Receiver<Envelope<Req, Resp>>,
}

impl<Req, Resp> Worker<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Dequeue jobs one at a time, in order, dispatching each to `dispatch`
    /// before looking at the next. This funnels every hardware-touching
    /// operation through a single scheduling point, complementing the
    /// Serializer one layer down.
    pub async fn run<F, Fut>(mut self, mut dispatch: F)
    where
        F: FnMut(Req) -> Fut,
        Fut: std::future::Future<Output = Resp>,
    {
        while let Some(envelope) = self.receiver.recv().await {
            debug!(job_id = %envelope.id, "dequeued job");
            let result = dispatch(envelope.payload).await;
            // Late producer (timed out and stopped waiting): send fails,
            // we drop the result. No leak, no double-deliver.
            let _ = envelope.reply.send(result);
        }
    }
}
