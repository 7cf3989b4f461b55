//! End-to-end admission scenarios through the gate.
//!
//! Time is paused, so queue waits expire as soon as every task is idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use apf_fairqueue::{
    CostEstimate, Decision, FlowId, QueueIndex, Request, RequestContext, SchedulingEvents,
};
use apf_scheduler::{
    CostEstimator, Gate, GateBuilder, Outcome, RejectReason, SchedulerError, SchedulerResult,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Serves `path` with a handler that holds its seat until released.
async fn hold(
    gate: &Arc<Gate<str>>,
    path: &'static str,
) -> (JoinHandle<Outcome<&'static str>>, oneshot::Sender<()>) {
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let gate = Arc::clone(gate);

    let handle = tokio::spawn(async move {
        gate.serve(path, RequestContext::new(), move || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            path
        })
        .await
        .unwrap()
    });

    started_rx.await.unwrap();
    (handle, release_tx)
}

/// Timers fire on millisecond ticks, so allow the expiry to round up.
fn assert_waited(start: Instant, expected: Duration) {
    let waited = start.elapsed();
    assert!(
        waited >= expected && waited <= expected + Duration::from_millis(5),
        "waited {waited:?}, expected {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_times_out_behind_busy_seat() {
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_name("scenario-a")
            .with_queuing(128, 1)
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;

    // /second queues behind /first, which never lets go within the default
    // 3s queue wait.
    let start = Instant::now();
    let second = gate
        .serve("/second", RequestContext::new(), || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Rejected(RejectReason::QueueWaitExpired));
    assert_waited(start, Duration::from_secs(3));

    release_first.send(()).unwrap();
    assert_eq!(first.await.unwrap(), Outcome::Served("/first"));

    // The seat is free again.
    let second = gate
        .serve("/second", RequestContext::new(), || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Served("/second"));
}

#[tokio::test(start_paused = true)]
async fn test_queued_request_runs_when_seat_frees() {
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_queuing(128, 1)
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;

    let waiter = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            gate.serve("/second", RequestContext::new(), || async { "/second" })
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    release_first.send(()).unwrap();

    assert_eq!(first.await.unwrap(), Outcome::Served("/first"));
    assert_eq!(waiter.await.unwrap(), Outcome::Served("/second"));
}

#[tokio::test(start_paused = true)]
async fn test_no_wait_rejects_second_concurrent_request() {
    let gate = Arc::new(GateBuilder::<str>::new(1).build().unwrap());

    let (first, release_first) = hold(&gate, "/first").await;

    let second = gate
        .serve("/second", RequestContext::new(), || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Rejected(RejectReason::Accommodation));

    release_first.send(()).unwrap();
    assert_eq!(first.await.unwrap(), Outcome::Served("/first"));

    let second = gate
        .serve("/second", RequestContext::new(), || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Served("/second"));
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_rejects_immediately() {
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_queuing(0, 1)
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;

    let start = Instant::now();
    let second = gate
        .serve("/second", RequestContext::new(), || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Rejected(RejectReason::Accommodation));
    assert_eq!(start.elapsed(), Duration::ZERO);

    release_first.send(()).unwrap();
    first.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_bounds_queue_wait() {
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_queuing(128, 1)
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;

    // A quarter of the caller's 2s budget goes to waiting.
    let start = Instant::now();
    let context = RequestContext::new().with_deadline(start + Duration::from_secs(2));
    let second = gate
        .serve("/second", context, || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Rejected(RejectReason::QueueWaitExpired));
    assert_waited(start, Duration::from_millis(500));

    release_first.send(()).unwrap();
    first.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_exempt_requests_bypass_full_gate() {
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_exemption(|path: &str| path == "/healthz")
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;

    let health = gate
        .serve("/healthz", RequestContext::new(), || async { "ok" })
        .await
        .unwrap();
    assert_eq!(health, Outcome::Exempt("ok"));

    release_first.send(()).unwrap();
    first.await.unwrap();
}

struct FailingEstimator;

impl CostEstimator<str> for FailingEstimator {
    fn estimate(&self, request: &str) -> SchedulerResult<CostEstimate> {
        Err(SchedulerError::Estimate {
            message: format!("no cost model for {request}"),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_estimate_error_skips_handler() {
    let gate = GateBuilder::<str>::new(1)
        .with_estimator(FailingEstimator)
        .build()
        .unwrap();

    let mut ran = false;
    let err = gate
        .serve("/unknown", RequestContext::new(), || {
            ran = true;
            async {}
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::Estimate { .. }));
    assert!(!ran);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn record(&self, kind: &str, request: &Request) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{kind} {} {}", request.label(), request.flow_id()));
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }
}

impl SchedulingEvents for Recorder {
    fn arrived(&self, request: &Request) {
        self.record("arrived", request);
    }

    fn queue_selected(&self, _queue: QueueIndex, request: &Request) {
        self.record("queue-selected", request);
    }

    fn enqueued(&self, _queue: QueueIndex, request: &Request) {
        self.record("enqueued", request);
    }

    fn dequeued(&self, _queue: QueueIndex, request: &Request) {
        self.record("dequeued", request);
    }

    fn decision_changed(&self, request: &Request, decision: Decision) {
        self.record(&format!("decision-{decision:?}"), request);
    }

    fn execution_starting(&self, request: &Request) {
        self.record("starting", request);
    }

    fn execution_ended(&self, request: &Request) {
        self.record("ended", request);
    }

    fn disposed(&self, request: &Request) {
        self.record("disposed", request);
    }

    fn timed_out(&self, request: &Request) {
        self.record("timed-out", request);
    }
}

fn recorded(kinds: &[&str], label: &str, flow: FlowId) -> Vec<String> {
    kinds
        .iter()
        .map(|kind| format!("{kind} {label} {flow}"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_for_served_request() {
    let recorder = Arc::new(Recorder::default());
    let gate = GateBuilder::<str>::new(2)
        .with_queuing(16, 4)
        .with_flow_distinguisher(|path: &str| {
            vec![path.split('/').nth(1).unwrap_or_default().to_string()]
        })
        .with_labeler(|path: &str| format!("GET {path}"))
        .with_events(Arc::clone(&recorder) as Arc<dyn SchedulingEvents>)
        .build()
        .unwrap();

    let outcome = gate
        .serve("/tenant-a/items", RequestContext::new(), || async { 200 })
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Served(200));

    let flow = apf_scheduler::compute_flow(&["tenant-a"]);
    assert_eq!(
        recorder.take(),
        recorded(
            &[
                "arrived",
                "queue-selected",
                "enqueued",
                "dequeued",
                "decision-Execute",
                "starting",
                "ended",
                "disposed",
            ],
            "GET /tenant-a/items",
            flow,
        )
    );
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_events_for_expired_wait() {
    let recorder = Arc::new(Recorder::default());
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_queuing(128, 1)
            .with_labeler(|path: &str| path.to_string())
            .with_events(Arc::clone(&recorder) as Arc<dyn SchedulingEvents>)
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;
    recorder.take();

    let second = gate
        .serve("/second", RequestContext::new(), || async { "/second" })
        .await
        .unwrap();
    assert_eq!(second, Outcome::Rejected(RejectReason::QueueWaitExpired));
    assert_eq!(
        recorder.take(),
        recorded(
            &["arrived", "queue-selected", "enqueued", "timed-out"],
            "/second",
            FlowId::default(),
        )
    );

    release_first.send(()).unwrap();
    first.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_is_rejected() {
    let gate = Arc::new(
        GateBuilder::<str>::new(1)
            .with_queuing(128, 1)
            .build()
            .unwrap(),
    );

    let (first, release_first) = hold(&gate, "/first").await;

    let cancellation = tokio_util::sync::CancellationToken::new();
    let waiter = {
        let gate = Arc::clone(&gate);
        let context = RequestContext::new().with_cancellation(cancellation.clone());
        tokio::spawn(async move {
            gate.serve("/second", context, || async { "/second" })
                .await
                .unwrap()
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancellation.cancel();
    assert_eq!(
        waiter.await.unwrap(),
        Outcome::Rejected(RejectReason::QueueWaitExpired)
    );

    release_first.send(()).unwrap();
    first.await.unwrap();
}
