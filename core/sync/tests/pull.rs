//! End-to-end tests for pull sessions against scripted transports and
//! instrumented stores.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

use microsync_common::{
    Content, DocumentId, DocumentRevision, Error, Result, Revision, ServiceName,
};
use microsync_store::{DocumentStore, LocalStore, MemoryStore, WriteOutcome};
use microsync_sync::{
    PullSync, RetryConfig, SessionOutcome, SessionRegistry, SyncConfig,
};
use microsync_transport::{MemoryTransport, Transport};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Step {
    Body(&'static str),
    Transient,
    Permanent,
    Hang,
}

/// Transport that replays a script, then repeats a fallback step forever.
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    fn gaps(&self) -> Vec<Duration> {
        self.calls()
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn request(&self, service: &ServiceName, _timeout: Duration) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(Instant::now());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Body(body) => Ok(body.as_bytes().to_vec()),
            Step::Transient => Err(Error::TransientFetch(format!("{} unreachable", service))),
            Step::Permanent => Err(Error::PermanentFetch(format!("{} unknown", service))),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Store that lets a foreign writer win the first write race.
struct RacingStore {
    inner: MemoryStore,
    raced: AtomicBool,
}

#[async_trait]
impl DocumentStore for RacingStore {
    fn name(&self) -> &str {
        "racing"
    }

    async fn read_document(&self, id: &DocumentId) -> Result<DocumentRevision> {
        self.inner.read_document(id).await
    }

    async fn write_document(
        &self,
        id: &DocumentId,
        content: Content,
        expected: Revision,
    ) -> Result<WriteOutcome> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner
                .write_document(id, doc(json!({"writer": "someone else"})), expected)
                .await?;
        }
        self.inner.write_document(id, content, expected).await
    }
}

/// Store that records overlapping writes and the number of writes.
struct InstrumentedStore {
    inner: MemoryStore,
    in_write: AtomicBool,
    overlapped: AtomicBool,
    writes: AtomicU64,
    write_latency: Duration,
}

impl InstrumentedStore {
    fn new(write_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            in_write: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            writes: AtomicU64::new(0),
            write_latency,
        })
    }

    fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for InstrumentedStore {
    fn name(&self) -> &str {
        "instrumented"
    }

    async fn read_document(&self, id: &DocumentId) -> Result<DocumentRevision> {
        self.inner.read_document(id).await
    }

    async fn write_document(
        &self,
        id: &DocumentId,
        content: Content,
        expected: Revision,
    ) -> Result<WriteOutcome> {
        if self.in_write.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        sleep(self.write_latency).await;
        let outcome = self.inner.write_document(id, content, expected).await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.in_write.store(false, Ordering::SeqCst);
        outcome
    }
}

/// Store whose writes always fail.
struct ReadOnlyStore;

#[async_trait]
impl DocumentStore for ReadOnlyStore {
    fn name(&self) -> &str {
        "read-only"
    }

    async fn read_document(&self, _id: &DocumentId) -> Result<DocumentRevision> {
        Ok(DocumentRevision::empty())
    }

    async fn write_document(
        &self,
        _id: &DocumentId,
        _content: Content,
        _expected: Revision,
    ) -> Result<WriteOutcome> {
        Err(Error::Storage("store is read-only".to_string()))
    }
}

/// Store whose reads take a fixed time, counting the writes it receives.
struct SlowReadStore {
    inner: MemoryStore,
    read_latency: Duration,
    writes: AtomicU64,
}

impl SlowReadStore {
    fn new(read_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            read_latency,
            writes: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl DocumentStore for SlowReadStore {
    fn name(&self) -> &str {
        "slow-read"
    }

    async fn read_document(&self, id: &DocumentId) -> Result<DocumentRevision> {
        sleep(self.read_latency).await;
        self.inner.read_document(id).await
    }

    async fn write_document(
        &self,
        id: &DocumentId,
        content: Content,
        expected: Revision,
    ) -> Result<WriteOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write_document(id, content, expected).await
    }
}

fn doc(value: serde_json::Value) -> Content {
    value.as_object().cloned().unwrap()
}

fn weather() -> ServiceName {
    ServiceName::new("weather").unwrap()
}

fn forecast() -> DocumentId {
    DocumentId::new("forecast").unwrap()
}

fn engine(
    store: Arc<dyn DocumentStore>,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
) -> (PullSync, Arc<SessionRegistry>) {
    let registry = Arc::new(SessionRegistry::new());
    let engine = PullSync::new(store, transport, config)
        .unwrap()
        .with_registry(registry.clone());
    (engine, registry)
}

fn fast_poll() -> SyncConfig {
    SyncConfig::default().with_poll_interval(Duration::from_millis(100))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_two_snapshots_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(
        vec![
            Step::Body(r#"{"name": "tiger", "v": 1}"#),
            Step::Body(r#"{"v": 2}"#),
        ],
        Step::Hang,
    );
    let (engine, registry) = engine(store.clone(), transport.clone(), fast_poll());

    assert_eq!(store.read_document(&forecast()).await.unwrap().revision, Revision::INITIAL);

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_millis(500)).await;

    let current = store.read_document(&forecast()).await.unwrap();
    assert_eq!(current.content, doc(json!({"v": 2})));
    assert_eq!(current.revision, Revision::new(2));
    assert_eq!(transport.gaps()[0], Duration::from_millis(100));

    let report = handle.stop().await;
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(report.merges, 2);
    assert!(report.last_error.is_none());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_follow_backoff_then_fail() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(vec![], Step::Transient);
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(6)
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_secs(30)),
    );
    let (engine, registry) = engine(store.clone(), transport.clone(), config);

    let handle = engine.start(weather(), forecast()).unwrap();
    let report = handle.wait().await;

    assert_eq!(report.outcome, SessionOutcome::Failed);
    assert_eq!(transport.calls().len(), 7);
    let expected: Vec<Duration> = [1, 2, 4, 8, 16, 30]
        .iter()
        .map(|s| Duration::from_secs(*s))
        .collect();
    assert_eq!(transport.gaps(), expected);
    assert!(report.last_error.unwrap().contains("unreachable"));
    assert!(store.is_empty());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_attempt_count() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(
        vec![
            Step::Transient,
            Step::Transient,
            Step::Body(r#"{"v": 1}"#),
            Step::Transient,
        ],
        Step::Hang,
    );
    let (engine, _registry) = engine(store.clone(), transport.clone(), fast_poll());

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_secs(10)).await;

    // Backoff restarts at the initial delay after the successful cycle.
    assert_eq!(
        transport.gaps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_millis(100),
            Duration::from_secs(1),
        ]
    );
    assert_eq!(store.read_document(&forecast()).await.unwrap().revision, Revision::new(1));

    let report = handle.stop().await;
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(report.merges, 1);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_fails_without_retry() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(vec![], Step::Permanent);
    let (engine, registry) = engine(store.clone(), transport.clone(), fast_poll());

    let report = engine.start(weather(), forecast()).unwrap().wait().await;

    assert_eq!(report.outcome, SessionOutcome::Failed);
    assert_eq!(transport.calls().len(), 1);
    assert!(store.is_empty());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_fails_without_writing() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(vec![Step::Body("<html>oops</html>")], Step::Hang);
    let (engine, _registry) = engine(store.clone(), transport.clone(), fast_poll());

    let report = engine.start(weather(), forecast()).unwrap().wait().await;

    assert!(report.is_failed());
    assert_eq!(transport.calls().len(), 1);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_merge_error_fails_session() {
    let transport = ScriptedTransport::new(vec![], Step::Body(r#"{"v": 1}"#));
    let (engine, registry) = engine(Arc::new(ReadOnlyStore), transport.clone(), fast_poll());

    let report = engine.start(weather(), forecast()).unwrap().wait().await;

    assert_eq!(report.outcome, SessionOutcome::Failed);
    assert_eq!(transport.calls().len(), 1);
    assert!(report.last_error.unwrap().contains("read-only"));
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_conflict_retries_immediately() {
    let store = Arc::new(RacingStore {
        inner: MemoryStore::new(),
        raced: AtomicBool::new(false),
    });
    let transport = ScriptedTransport::new(
        vec![Step::Body(r#"{"v": 1}"#), Step::Body(r#"{"v": 1}"#)],
        Step::Hang,
    );
    let (engine, _registry) = engine(store.clone(), transport.clone(), fast_poll());

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_secs(1)).await;

    // Both fetches happen at the same instant: no backoff was taken.
    assert_eq!(transport.gaps(), vec![Duration::ZERO, Duration::from_millis(100)]);

    let current = store.read_document(&forecast()).await.unwrap();
    assert_eq!(current.content, doc(json!({"v": 1})));
    assert_eq!(current.revision, Revision::new(2));

    let report = handle.stop().await;
    assert_eq!(report.merges, 1);
    assert!(report.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_writes_never_overlap_and_stop_after_stop() {
    let store = InstrumentedStore::new(Duration::from_millis(20));
    let transport = ScriptedTransport::new(vec![], Step::Body(r#"{"v": 1}"#));
    let config = SyncConfig::default().with_poll_interval(Duration::ZERO);
    let (engine, _registry) = engine(store.clone(), transport, config);

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_secs(1)).await;

    let report = handle.stop().await;
    let writes_at_stop = store.writes();
    assert!(writes_at_stop > 1);
    assert!(!store.overlapped.load(Ordering::SeqCst));
    assert_eq!(report.merges, writes_at_stop);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.writes(), writes_at_stop);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(vec![], Step::Body(r#"{"v": 1}"#));
    let (engine, registry) = engine(store.clone(), transport, fast_poll());

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_millis(350)).await;

    let other = handle.clone();
    let (first, second) = tokio::join!(handle.stop(), other.stop());
    let third = handle.stop().await;

    for report in [&first, &second, &third] {
        assert_eq!(report.outcome, SessionOutcome::Stopped);
        assert_eq!(report.session_id, first.session_id);
        assert_eq!(report.merges, first.merges);
    }
    assert!(handle.is_finished());
    assert!(registry.is_empty());

    let revision = store.read_document(&forecast()).await.unwrap().revision;
    assert_eq!(revision.value(), first.merges);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.read_document(&forecast()).await.unwrap().revision, revision);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_backoff() {
    let transport = ScriptedTransport::new(vec![], Step::Transient);
    let config = SyncConfig::default().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(60)),
    );
    let (engine, registry) = engine(Arc::new(MemoryStore::new()), transport.clone(), config);

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    let report = handle.stop().await;

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(transport.calls().len(), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_in_flight_fetch() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(vec![], Step::Hang);
    let config = SyncConfig::default().with_fetch_timeout(Duration::from_secs(3600));
    let (engine, registry) = engine(store.clone(), transport.clone(), config);

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(!handle.is_finished());

    let report = handle.stop().await;
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(transport.calls().len(), 1);
    assert!(store.is_empty());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_read_discards_merge() {
    let store = SlowReadStore::new(Duration::from_secs(5));
    let transport = ScriptedTransport::new(vec![Step::Body(r#"{"v": 1}"#)], Step::Hang);
    let (engine, registry) = engine(store.clone(), transport.clone(), fast_poll());

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_secs(1)).await;
    assert!(!handle.is_finished());

    let report = handle.stop().await;
    assert_eq!(report.outcome, SessionOutcome::Stopped);
    assert_eq!(report.merges, 0);
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
    assert!(store.inner.is_empty());
    assert_eq!(transport.calls().len(), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_is_retried() {
    let store = Arc::new(MemoryStore::new());
    let transport = ScriptedTransport::new(vec![Step::Hang], Step::Body(r#"{"v": 1}"#));
    let config = fast_poll().with_fetch_timeout(Duration::from_secs(5));
    let (engine, _registry) = engine(store.clone(), transport.clone(), config);

    let handle = engine.start(weather(), forecast()).unwrap();
    sleep(Duration::from_secs(6) + Duration::from_millis(50)).await;

    // Timed out after 5s, backed off 1s, then succeeded.
    assert_eq!(transport.gaps()[0], Duration::from_secs(6));
    assert_eq!(store.read_document(&forecast()).await.unwrap().revision, Revision::new(1));

    let report = handle.stop().await;
    assert!(report.last_error.unwrap().contains("timed out"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one_session() {
    let transport = ScriptedTransport::new(vec![], Step::Hang);
    let (engine, registry) = engine(Arc::new(MemoryStore::new()), transport, SyncConfig::default());
    let engine = Arc::new(engine);

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start(weather(), forecast()) })
        })
        .collect();

    let mut handles = Vec::new();
    let mut rejected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(handle) => handles.push(handle),
            Err(Error::AlreadyRunning { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(handles.len(), 1);
    assert_eq!(rejected, 15);
    assert_eq!(registry.len(), 1);

    handles[0].stop().await;
    assert!(registry.is_empty());

    // The pair is free again once the session has stopped.
    let restarted = engine.start(weather(), forecast()).unwrap();
    restarted.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sessions_for_different_documents_run_independently() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryTransport::new());
    transport.publish(&weather(), r#"{"temp": 21}"#);
    let (engine, registry) = engine(store.clone(), transport.clone(), fast_poll());

    let today = DocumentId::new("today").unwrap();
    let archive = DocumentId::new("archive").unwrap();
    let a = engine.start(weather(), today.clone()).unwrap();
    let b = engine.start(weather(), archive.clone()).unwrap();
    assert_eq!(registry.len(), 2);

    sleep(Duration::from_millis(50)).await;
    a.stop().await;
    assert!(!b.is_finished());
    assert_eq!(registry.len(), 1);

    sleep(Duration::from_millis(500)).await;
    let b_report = b.stop().await;

    let today_rev = store.read_document(&today).await.unwrap().revision;
    let archive_rev = store.read_document(&archive).await.unwrap().revision;
    assert_eq!(today_rev, Revision::new(1));
    assert!(archive_rev > today_rev);
    assert_eq!(archive_rev.value(), b_report.merges);
}

#[tokio::test]
async fn test_pull_into_local_store() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(LocalStore::new(temp.path()).unwrap());
    let transport = Arc::new(MemoryTransport::new());
    transport.publish(&weather(), r#"{"temp": 21, "unit": "C"}"#);
    let config = SyncConfig::default().with_poll_interval(Duration::from_millis(10));
    let (engine, _registry) = engine(store.clone(), transport, config);

    let handle = engine.start(weather(), forecast()).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if store.read_document(&forecast()).await.unwrap().revision >= Revision::new(1) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "document was never written");
        sleep(Duration::from_millis(5)).await;
    }

    let report = handle.stop().await;
    let current = store.read_document(&forecast()).await.unwrap();
    assert_eq!(current.content, doc(json!({"temp": 21, "unit": "C"})));
    assert_eq!(current.revision.value(), report.merges);
}
