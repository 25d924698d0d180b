//! Worker transport: asynchronous message passing to an isolated
//! compute unit.
//!
//! The transport hosts exactly one [`ActiveBackend`] on a dedicated
//! worker thread and talks to it over bounded channels. Every request
//! carries a correlation id; a dispatcher thread resolves responses
//! against a pending-request table. A timed-out request is removed
//! from the table, so a late answer for it is silently dropped.
//!
//! Requests are drained by the single worker in submission order.
//! Because the backend's state is cumulative, callers must await each
//! causally-dependent response before sending the next request; the
//! transport does not serialize that discipline for them.

pub mod protocol;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::de::DeserializeOwned;

use crate::backend::{ActiveBackend, ComputeBackend, LoadAck, Metrics, SimulationResult};
use crate::change::Change;
use crate::entity::EntityDataset;
use crate::error::TransportError;

pub use protocol::{RequestEnvelope, RequestId, RequestKind, ResponseBody, ResponseEnvelope};

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum queued requests.
    pub queue_capacity: usize,
    /// Bound on each outstanding request.
    pub request_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            request_timeout: Duration::from_secs(30),
        }
    }
}

enum Job {
    Request(RequestEnvelope),

    #[cfg(test)]
    Stall {
        started: Sender<()>,
        duration: Duration,
    },
}

type PendingTable = Arc<Mutex<HashMap<RequestId, Sender<ResponseEnvelope>>>>;

/// Handle for one outstanding request.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    rx: Receiver<ResponseEnvelope>,
    pending: PendingTable,
}

impl RequestHandle {
    /// The correlation id of this request.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the response without a bound.
    ///
    /// Prefer [`join_timeout`](Self::join_timeout); this blocks until
    /// the worker answers or the transport shuts down.
    pub fn join(self) -> Result<Option<serde_json::Value>, TransportError> {
        match self.rx.recv() {
            Ok(envelope) => envelope.into_result(),
            Err(_) => {
                remove_pending(&self.pending, self.id);
                Err(TransportError::WorkerGone)
            }
        }
    }

    /// Waits for the response with a bound. On expiry the pending
    /// entry is removed, so the eventual answer is dropped.
    pub fn join_timeout(self, timeout: Duration) -> Result<Option<serde_json::Value>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => envelope.into_result(),
            Err(RecvTimeoutError::Timeout) => {
                remove_pending(&self.pending, self.id);
                Err(TransportError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                remove_pending(&self.pending, self.id);
                Err(TransportError::WorkerGone)
            }
        }
    }
}

/// Message-passing bridge to the worker-hosted compute backend.
///
/// An explicitly constructed, owned resource: create it, call
/// [`initialize`](Self::initialize), and [`terminate`](Self::terminate)
/// (or drop) when done. No global instance exists.
pub struct WorkerTransport {
    tx: Option<Sender<Job>>,
    pending: PendingTable,
    worker: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    config: WorkerConfig,
}

impl WorkerTransport {
    /// Spawns the worker and dispatcher threads.
    #[must_use]
    pub fn start(config: WorkerConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (job_tx, job_rx) = bounded::<Job>(capacity);
        let (resp_tx, resp_rx) = bounded::<ResponseEnvelope>(capacity);
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let worker = thread::Builder::new()
            .name("tourline-worker".to_string())
            .spawn(move || worker_loop(&job_rx, &resp_tx))
            .expect("failed to spawn tourline worker");

        let dispatch_pending = Arc::clone(&pending);
        let dispatcher = thread::Builder::new()
            .name("tourline-dispatch".to_string())
            .spawn(move || dispatch_loop(&resp_rx, &dispatch_pending))
            .expect("failed to spawn tourline dispatcher");

        Self {
            tx: Some(job_tx),
            pending,
            worker: Some(worker),
            dispatcher: Some(dispatcher),
            config,
        }
    }

    /// The configured per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Sends one request and returns a handle for its response.
    pub fn request(
        &self,
        kind: RequestKind,
        payload: Option<serde_json::Value>,
    ) -> Result<RequestHandle, TransportError> {
        self.send_envelope(|id| RequestEnvelope::new(id, kind, payload))
    }

    /// Brings up the compute backend inside the worker.
    ///
    /// If the native engine cannot be loaded the worker substitutes the
    /// fallback and still reports success; the caller is not told which
    /// backend is active.
    pub fn initialize(&self) -> Result<(), TransportError> {
        self.request(RequestKind::Init, None)?
            .join_timeout(self.config.request_timeout)?;
        Ok(())
    }

    /// Loads a dataset into the backend's working copy.
    pub fn load_dataset(&self, dataset: &EntityDataset) -> Result<LoadAck, TransportError> {
        let payload = encode(dataset)?;
        let result = self
            .request(RequestKind::LoadData, Some(payload))?
            .join_timeout(self.config.request_timeout)?;
        decode(result)
    }

    /// Submits a change for simulation without waiting for the result.
    pub fn submit_simulate(&self, change: &Change) -> Result<RequestHandle, TransportError> {
        let payload = encode(change)?;
        self.request(RequestKind::Simulate, Some(payload))
    }

    /// Simulates a change and waits for its impact.
    pub fn simulate(&self, change: &Change) -> Result<SimulationResult, TransportError> {
        let result = self
            .submit_simulate(change)?
            .join_timeout(self.config.request_timeout)?;
        decode(result)
    }

    /// Recomputes aggregate metrics from the backend's working copy.
    pub fn get_metrics(&self) -> Result<Metrics, TransportError> {
        let result = self
            .request(RequestKind::GetMetrics, None)?
            .join_timeout(self.config.request_timeout)?;
        decode(result)
    }

    /// Shuts the worker down and joins both threads. Subsequent
    /// requests fail with [`TransportError::WorkerGone`].
    pub fn terminate(&mut self) {
        // Closing the job channel lets the worker drain and exit; the
        // dispatcher follows once the response channel closes.
        self.tx = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        lock_pending(&self.pending).clear();
    }

    fn send_envelope(
        &self,
        build: impl FnOnce(RequestId) -> RequestEnvelope,
    ) -> Result<RequestHandle, TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::WorkerGone)?;

        let id = RequestId::new();
        let (reply_tx, reply_rx) = bounded::<ResponseEnvelope>(1);
        lock_pending(&self.pending).insert(id, reply_tx);

        match tx.try_send(Job::Request(build(id))) {
            Ok(()) => Ok(RequestHandle {
                id,
                rx: reply_rx,
                pending: Arc::clone(&self.pending),
            }),
            Err(TrySendError::Full(_)) => {
                remove_pending(&self.pending, id);
                Err(TransportError::QueueFull {
                    capacity: self.config.queue_capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                remove_pending(&self.pending, id);
                Err(TransportError::WorkerGone)
            }
        }
    }

    #[cfg(test)]
    fn request_wire(
        &self,
        kind: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<RequestHandle, TransportError> {
        let kind = kind.to_string();
        self.send_envelope(|id| RequestEnvelope {
            id,
            kind,
            payload,
        })
    }

    // Blocks until the worker has dequeued the stall, so the job queue
    // is empty when this returns.
    #[cfg(test)]
    fn submit_stall(&self, duration: Duration) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::WorkerGone)?;
        let (started_tx, started_rx) = bounded::<()>(1);
        tx.try_send(Job::Stall {
            started: started_tx,
            duration,
        })
        .map_err(|_| TransportError::WorkerGone)?;
        started_rx
            .recv_timeout(Duration::from_secs(1))
            .map_err(|_| TransportError::WorkerGone)
    }

    #[cfg(test)]
    fn pending_contains(&self, id: RequestId) -> bool {
        lock_pending(&self.pending).contains_key(&id)
    }
}

impl Drop for WorkerTransport {
    fn drop(&mut self) {
        // Deterministic shutdown: stop both threads and join them.
        self.terminate();
    }
}

fn worker_loop(rx: &Receiver<Job>, tx: &Sender<ResponseEnvelope>) {
    let mut backend: Option<ActiveBackend> = None;
    while let Ok(job) = rx.recv() {
        match job {
            Job::Request(envelope) => {
                let response = handle_request(&mut backend, envelope);
                if tx.send(response).is_err() {
                    break;
                }
            }

            #[cfg(test)]
            Job::Stall { started, duration } => {
                let _ = started.send(());
                thread::sleep(duration);
            }
        }
    }
}

fn dispatch_loop(rx: &Receiver<ResponseEnvelope>, pending: &PendingTable) {
    while let Ok(envelope) = rx.recv() {
        // A missing entry means the caller already timed out; the late
        // answer is dropped here.
        let reply = lock_pending(pending).remove(&envelope.id);
        if let Some(reply) = reply {
            let _ = reply.send(envelope);
        }
    }
}

fn handle_request(backend: &mut Option<ActiveBackend>, envelope: RequestEnvelope) -> ResponseEnvelope {
    let Some(kind) = RequestKind::parse(&envelope.kind) else {
        return ResponseEnvelope::error(
            envelope.id,
            format!("unrecognized message type '{}'", envelope.kind),
        );
    };

    let outcome = match kind {
        RequestKind::Init => {
            *backend = Some(ActiveBackend::init());
            Ok(None)
        }
        RequestKind::LoadData => with_backend(backend, |b| {
            let dataset: EntityDataset = parse_payload(envelope.payload.as_ref())?;
            let ack = b.load_dataset(dataset).map_err(|e| e.to_string())?;
            encode_result(&ack)
        }),
        RequestKind::Simulate => with_backend(backend, |b| {
            let change: Change = parse_payload(envelope.payload.as_ref())?;
            let result = b.simulate(&change).map_err(|e| e.to_string())?;
            encode_result(&result)
        }),
        RequestKind::GetMetrics => with_backend(backend, |b| {
            let metrics = b.metrics().map_err(|e| e.to_string())?;
            encode_result(&metrics)
        }),
    };

    match outcome {
        Ok(result) => ResponseEnvelope::success(envelope.id, result),
        Err(message) => ResponseEnvelope::error(envelope.id, message),
    }
}

fn with_backend(
    backend: &mut Option<ActiveBackend>,
    op: impl FnOnce(&mut ActiveBackend) -> Result<Option<serde_json::Value>, String>,
) -> Result<Option<serde_json::Value>, String> {
    let backend = backend
        .as_mut()
        .ok_or_else(|| "backend not initialized; send 'init' first".to_string())?;
    op(backend)
}

fn parse_payload<T: DeserializeOwned>(payload: Option<&serde_json::Value>) -> Result<T, String> {
    let payload = payload.ok_or_else(|| "missing payload".to_string())?;
    serde_json::from_value(payload.clone()).map_err(|e| format!("malformed payload: {e}"))
}

fn encode_result<T: serde::Serialize>(value: &T) -> Result<Option<serde_json::Value>, String> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|e| format!("result serialization failed: {e}"))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, TransportError> {
    serde_json::to_value(value).map_err(|e| TransportError::SerializationFailed {
        message: e.to_string(),
    })
}

pub(crate) fn decode<T: DeserializeOwned>(
    result: Option<serde_json::Value>,
) -> Result<T, TransportError> {
    let value = result.ok_or_else(|| TransportError::SerializationFailed {
        message: "worker response carried no result".to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| TransportError::SerializationFailed {
        message: e.to_string(),
    })
}

fn lock_pending(pending: &PendingTable) -> std::sync::MutexGuard<'_, HashMap<RequestId, Sender<ResponseEnvelope>>> {
    pending.lock().expect("pending-request table lock poisoned")
}

fn remove_pending(pending: &PendingTable, id: RequestId) {
    lock_pending(pending).remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::small_dataset;
    use serde_json::json;

    fn started() -> WorkerTransport {
        WorkerTransport::start(WorkerConfig::default())
    }

    #[test]
    fn init_load_simulate_metrics_round_trip() {
        let transport = started();
        transport.initialize().unwrap();

        let ack = transport.load_dataset(&small_dataset()).unwrap();
        assert_eq!(ack.entities_loaded, 3);

        let result = transport.simulate(&Change::delete("R1")).unwrap();
        assert!(!result.affected_entities.is_empty());

        let metrics = transport.get_metrics().unwrap();
        // R1 was deleted from the cumulative working copy.
        assert_eq!(metrics.total_releases, 0);
        assert_eq!(metrics.total_tasks, 1);
    }

    #[test]
    fn requests_before_init_are_rejected() {
        let transport = started();
        let err = transport.get_metrics().unwrap_err();
        let TransportError::Rejected { message } = err else {
            panic!("expected rejection, got {err:?}");
        };
        assert!(message.contains("init"));
    }

    #[test]
    fn unrecognized_message_type_is_rejected_explicitly() {
        let transport = started();
        let err = transport
            .request_wire("terminate", None)
            .unwrap()
            .join_timeout(Duration::from_secs(1))
            .unwrap_err();
        let TransportError::Rejected { message } = err else {
            panic!("expected rejection, got {err:?}");
        };
        assert!(message.contains("terminate"));
    }

    #[test]
    fn timeout_removes_pending_entry_and_drops_late_answer() {
        let transport = started();
        transport.initialize().unwrap();
        transport.load_dataset(&small_dataset()).unwrap();

        // Occupy the worker so the next request cannot be answered in time.
        transport.submit_stall(Duration::from_millis(150)).unwrap();

        let handle = transport.submit_simulate(&Change::delete("S1")).unwrap();
        let id = handle.id();
        assert!(transport.pending_contains(id));

        let err = handle.join_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(!transport.pending_contains(id));

        // Let the worker answer late; the dispatcher must drop it and the
        // transport must remain usable.
        thread::sleep(Duration::from_millis(250));
        assert!(!transport.pending_contains(id));
        let metrics = transport.get_metrics().unwrap();
        // The stalled simulate still ran on the worker.
        assert_eq!(metrics.total_tasks, 1);
    }

    #[test]
    fn queue_full_is_reported_and_entry_cleaned_up() {
        let transport = WorkerTransport::start(WorkerConfig {
            queue_capacity: 1,
            request_timeout: Duration::from_secs(1),
        });
        transport.initialize().unwrap();

        // submit_stall returns once the worker is sleeping, so the
        // single queue slot is free again.
        transport.submit_stall(Duration::from_millis(100)).unwrap();
        // One slot in the queue; the second request must be refused.
        let _queued = transport.request(RequestKind::GetMetrics, None).unwrap();
        let err = transport.request(RequestKind::GetMetrics, None).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull { capacity: 1 }));
        assert_eq!(lock_pending(&transport.pending).len(), 1);
    }

    #[test]
    fn request_handle_formats_for_diagnostics() {
        let transport = started();
        let handle = transport.request(RequestKind::Init, None).unwrap();
        assert!(format!("{handle:?}").contains("RequestHandle"));
        handle.join_timeout(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn terminate_makes_transport_unusable() {
        let mut transport = started();
        transport.initialize().unwrap();
        transport.terminate();

        let err = transport.request(RequestKind::GetMetrics, None).unwrap_err();
        assert!(matches!(err, TransportError::WorkerGone));
    }

    #[test]
    fn malformed_simulate_payload_is_an_error_response() {
        let transport = started();
        transport.initialize().unwrap();
        transport.load_dataset(&small_dataset()).unwrap();

        let err = transport
            .request(RequestKind::Simulate, Some(json!({ "bogus": true })))
            .unwrap()
            .join_timeout(Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
    }
}
