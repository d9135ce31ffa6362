/// Dispatch queue
///
/// Moves decode work off the socket reader. The reader copies each chunk out
/// of its reusable buffer and enqueues it; a single worker drains the queue
/// in FIFO order, so at most one chunk is decoded at a time and stream order
/// is preserved.

use crate::error::{MushError, Result};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Consumer side of the queue, run on the worker task
pub trait ChunkHandler: Send + 'static {
    /// Process one chunk; an error ends the worker
    fn handle_chunk(&mut self, chunk: Vec<u8>) -> Result<()>;

    /// Every producer is gone and the queue is drained
    fn handle_end(&mut self);

    /// `handle_chunk` failed
    fn handle_failure(&mut self, error: MushError);
}

/// Producer handle for the dispatch queue
///
/// Dropping every handle closes the queue; the worker then drains what is
/// left and calls `ChunkHandler::handle_end`.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
}

impl DispatchQueue {
    /// Create a bounded queue and start its worker
    pub fn spawn<H: ChunkHandler>(
        capacity: usize,
        token: CancellationToken,
        handler: H,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(rx, token.clone(), handler));
        (Self { tx, token }, worker)
    }

    /// Enqueue a chunk, waiting for space if the worker is behind.
    ///
    /// Returns `false` once the queue is cancelled or the worker has exited.
    pub async fn enqueue(&self, chunk: Vec<u8>) -> bool {
        select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.tx.send(chunk) => sent.is_ok(),
        }
    }
}

async fn run_worker<H: ChunkHandler>(
    mut rx: mpsc::Receiver<Vec<u8>>,
    token: CancellationToken,
    mut handler: H,
) {
    debug!("Dispatch worker started");

    loop {
        select! {
            biased;
            _ = token.cancelled() => {
                debug!("Dispatch worker cancelled");
                break;
            }
            next = rx.recv() => match next {
                Some(chunk) => {
                    trace!("Dispatching {} byte chunk", chunk.len());
                    if let Err(e) = handler.handle_chunk(chunk) {
                        handler.handle_failure(e);
                        break;
                    }
                }
                None => {
                    debug!("Dispatch queue closed");
                    handler.handle_end();
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Record {
        chunks: Vec<Vec<u8>>,
        ended: bool,
        failure: Option<String>,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        record: Arc<Mutex<Record>>,
        fail_on: Option<Vec<u8>>,
        /// Held by the test to stall the worker inside `handle_chunk`
        gate: Option<Arc<Mutex<()>>>,
    }

    impl ChunkHandler for Recorder {
        fn handle_chunk(&mut self, chunk: Vec<u8>) -> Result<()> {
            if let Some(gate) = &self.gate {
                let _open = gate.lock().unwrap();
            }
            if self.fail_on.as_ref() == Some(&chunk) {
                return Err(MushError::CompressionError("bad chunk".to_string()));
            }
            self.record.lock().unwrap().chunks.push(chunk);
            Ok(())
        }

        fn handle_end(&mut self) {
            self.record.lock().unwrap().ended = true;
        }

        fn handle_failure(&mut self, error: MushError) {
            self.record.lock().unwrap().failure = Some(error.to_string());
        }
    }

    #[tokio::test]
    async fn test_chunks_processed_in_enqueue_order() {
        let recorder = Recorder::default();
        let record = recorder.record.clone();

        let (queue, worker) = DispatchQueue::spawn(2, CancellationToken::new(), recorder);
        for chunk in [b"C1".to_vec(), b"C2".to_vec(), b"C3".to_vec()] {
            assert!(queue.enqueue(chunk).await);
        }
        drop(queue);
        worker.await.unwrap();

        let record = record.lock().unwrap();
        assert_eq!(record.chunks, vec![b"C1".to_vec(), b"C2".to_vec(), b"C3".to_vec()]);
        assert!(record.ended);
        assert!(record.failure.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_order_preserved_under_backpressure() {
        let recorder = Recorder::default();
        let record = recorder.record.clone();
        let (queue, worker) = DispatchQueue::spawn(4, CancellationToken::new(), recorder);

        for i in 0..200u8 {
            assert!(queue.enqueue(vec![i]).await);
        }
        drop(queue);
        worker.await.unwrap();

        let chunks = record.lock().unwrap().chunks.clone();
        let expected: Vec<Vec<u8>> = (0..200u8).map(|i| vec![i]).collect();
        assert_eq!(chunks, expected);
    }

    #[tokio::test]
    async fn test_failure_stops_worker() {
        let recorder = Recorder {
            fail_on: Some(b"bad".to_vec()),
            ..Default::default()
        };
        let record = recorder.record.clone();

        let (queue, worker) = DispatchQueue::spawn(8, CancellationToken::new(), recorder);
        assert!(queue.enqueue(b"good".to_vec()).await);
        assert!(queue.enqueue(b"bad".to_vec()).await);
        worker.await.unwrap();

        // Worker has exited; further enqueues are refused
        assert!(!queue.enqueue(b"late".to_vec()).await);

        let record = record.lock().unwrap();
        assert_eq!(record.chunks, vec![b"good".to_vec()]);
        assert!(record.failure.as_deref().unwrap().contains("bad chunk"));
        assert!(!record.ended);
    }

    #[tokio::test]
    async fn test_cancel_stops_worker_without_end() {
        let token = CancellationToken::new();
        let recorder = Recorder::default();
        let record = recorder.record.clone();

        let (queue, worker) = DispatchQueue::spawn(1, token.clone(), recorder);
        token.cancel();
        worker.await.unwrap();

        assert!(!queue.enqueue(b"after".to_vec()).await);
        let record = record.lock().unwrap();
        assert!(record.chunks.is_empty());
        assert!(!record.ended);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_producer_is_cancellable() {
        let token = CancellationToken::new();
        let gate = Arc::new(Mutex::new(()));
        let closed = gate.lock().unwrap();
        let recorder = Recorder {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let record = recorder.record.clone();

        let (queue, worker) = DispatchQueue::spawn(1, token.clone(), recorder);
        // The worker stalls on "1" and "2" fills the only slot
        assert!(queue.enqueue(b"1".to_vec()).await);
        assert!(queue.enqueue(b"2".to_vec()).await);

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(b"3".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        token.cancel();
        assert!(!blocked.await.unwrap());

        drop(closed);
        worker.await.unwrap();
        assert_eq!(record.lock().unwrap().chunks, vec![b"1".to_vec()]);
    }
}
