//! Per-logical-request context.
//!
//! The host (web request handler or job runner) builds one [`RequestContext`]
//! per logical request and passes it by reference into every client entry
//! point. The context owns the request-scoped store that holds N+1 accounting,
//! the session id and call statistics; it is dropped when the request ends and
//! nothing in it outlives the request.
//!
//! A context created with [`RequestContext::untracked`] has no store. Every
//! accounting operation on it is a no-op.
//!
//! Work fanned out concurrently within one request should run on
//! [`RequestContext::child`] contexts: children share the store but each owns
//! its call-site frames, so attribution does not depend on task interleaving.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use crate::errors::StatusCode;

/// Frames with this prefix belong to the client layer itself and are stripped
/// from stack signatures and call-site attribution.
pub const INTERNAL_FRAME_PREFIX: &str = "depot_client::";

/// What kind of work the logical request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    /// Interactive request, optionally carrying its own overall deadline
    Web { deadline: Option<SystemTime> },
    /// Background job; no request-level deadline applies
    Background,
}

impl ExecutionKind {
    pub fn is_background(&self) -> bool {
        matches!(self, ExecutionKind::Background)
    }

    /// Deadline of the whole request, if any.
    pub fn request_deadline(&self) -> Option<SystemTime> {
        match self {
            ExecutionKind::Web { deadline } => *deadline,
            ExecutionKind::Background => None,
        }
    }
}

/// Who triggered the request, forwarded for auditing on the storage side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    pub username: Option<String>,
    pub user_id: Option<String>,
    pub remote_ip: Option<String>,
}

/// Outcome of one dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    Failed(StatusCode),
}

/// One entry of the request's call-detail list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Nearest enclosing call-site label, if any
    pub call_site: Option<String>,
    pub storage: String,
    pub service: String,
    pub rpc: String,
    pub duration: Duration,
    pub outcome: CallOutcome,
}

/// Request-scoped key/value state.
///
/// Interior mutability throughout: a single request may fan calls out across
/// threads, so every counter is atomic or behind a mutex.
#[derive(Debug, Default)]
pub struct RequestStore {
    actual: Mutex<HashMap<String, u64>>,
    enforced: Mutex<HashMap<String, u64>>,
    summary_actual: AtomicU64,
    summary_enforced: AtomicU64,
    exemption_depth: AtomicUsize,
    stacks: Mutex<HashMap<String, u64>>,
    ref_name_caching: AtomicBool,
    quarantined: AtomicBool,
    session_id: OnceLock<String>,
    call_details_enabled: AtomicBool,
    call_details: Mutex<Vec<CallRecord>>,
    query_time: Mutex<Duration>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the actual counter of `call_site` and the summary counter.
    pub fn increment_actual(&self, call_site: &str) -> u64 {
        self.summary_actual.fetch_add(1, Ordering::SeqCst);
        let mut actual = self.actual.lock();
        let count = actual.entry(call_site.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Bump the enforced counter of `call_site` and the summary counter.
    pub fn increment_enforced(&self, call_site: &str) -> u64 {
        self.summary_enforced.fetch_add(1, Ordering::SeqCst);
        let mut enforced = self.enforced.lock();
        let count = enforced.entry(call_site.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn actual_count(&self, call_site: &str) -> u64 {
        self.actual.lock().get(call_site).copied().unwrap_or(0)
    }

    pub fn enforced_count(&self, call_site: &str) -> u64 {
        self.enforced.lock().get(call_site).copied().unwrap_or(0)
    }

    pub fn summary_actual(&self) -> u64 {
        self.summary_actual.load(Ordering::SeqCst)
    }

    pub fn summary_enforced(&self) -> u64 {
        self.summary_enforced.load(Ordering::SeqCst)
    }

    /// Zero the summary counters. Per-site accounting is left untouched.
    pub fn reset_summary(&self) {
        self.summary_actual.store(0, Ordering::SeqCst);
        self.summary_enforced.store(0, Ordering::SeqCst);
    }

    pub fn exemption_depth(&self) -> usize {
        self.exemption_depth.load(Ordering::SeqCst)
    }

    /// Enter an exemption scope. The depth is restored when the guard drops.
    pub fn enter_exemption(&self) -> ExemptionGuard<'_> {
        self.exemption_depth.fetch_add(1, Ordering::SeqCst);
        ExemptionGuard { store: self }
    }

    pub fn record_stack(&self, signature: String) -> u64 {
        let mut stacks = self.stacks.lock();
        let count = stacks.entry(signature).or_insert(0);
        *count += 1;
        *count
    }

    /// Highest stack occurrence count and every signature tied at it.
    pub fn max_call_stacks(&self) -> (u64, Vec<String>) {
        let stacks = self.stacks.lock();
        let max = stacks.values().copied().max().unwrap_or(0);
        if max == 0 {
            return (0, Vec::new());
        }
        let mut worst: Vec<String> = stacks
            .iter()
            .filter(|(_, count)| **count == max)
            .map(|(signature, _)| signature.clone())
            .collect();
        worst.sort();
        (max, worst)
    }

    pub fn ref_name_caching(&self) -> bool {
        self.ref_name_caching.load(Ordering::SeqCst)
    }

    /// Set the ref-name caching flag, returning the previous value.
    pub fn replace_ref_name_caching(&self, allowed: bool) -> bool {
        self.ref_name_caching.swap(allowed, Ordering::SeqCst)
    }

    /// Called by the write path once objects are staged in a quarantine directory.
    pub fn mark_quarantined(&self) {
        self.quarantined.store(true, Ordering::SeqCst);
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::SeqCst)
    }

    /// Session id, generated on first use and stable for the request.
    pub fn session_id(&self) -> &str {
        self.session_id
            .get_or_init(|| uuid::Uuid::new_v4().to_string())
    }

    /// Turn on call-detail collection for performance reporting.
    pub fn enable_call_details(&self) {
        self.call_details_enabled.store(true, Ordering::SeqCst);
    }

    pub fn call_details_enabled(&self) -> bool {
        self.call_details_enabled.load(Ordering::SeqCst)
    }

    /// Append a record; ignored unless collection is enabled.
    pub fn push_call_detail(&self, record: CallRecord) {
        if self.call_details_enabled() {
            self.call_details.lock().push(record);
        }
    }

    pub fn call_details(&self) -> Vec<CallRecord> {
        self.call_details.lock().clone()
    }

    pub fn add_query_time(&self, duration: Duration) {
        let mut total = self.query_time.lock();
        *total += duration;
    }

    pub fn query_time(&self) -> Duration {
        *self.query_time.lock()
    }
}

/// Scope marker returned by [`RequestStore::enter_exemption`].
#[derive(Debug)]
pub struct ExemptionGuard<'a> {
    store: &'a RequestStore,
}

impl Drop for ExemptionGuard<'_> {
    fn drop(&mut self) {
        self.store.exemption_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct Frame {
    id: u64,
    label: String,
}

/// Context for one logical request.
#[derive(Debug)]
pub struct RequestContext {
    kind: ExecutionKind,
    store: Option<Arc<RequestStore>>,
    caller: CallerIdentity,
    correlation_id: Option<String>,
    frames: Mutex<Vec<Frame>>,
    next_frame: AtomicU64,
}

impl RequestContext {
    /// Tracked interactive request.
    pub fn web(deadline: Option<SystemTime>) -> Self {
        Self::tracked(ExecutionKind::Web { deadline })
    }

    /// Tracked background job execution.
    pub fn background() -> Self {
        Self::tracked(ExecutionKind::Background)
    }

    pub fn tracked(kind: ExecutionKind) -> Self {
        Self {
            kind,
            store: Some(Arc::new(RequestStore::new())),
            caller: CallerIdentity::default(),
            correlation_id: None,
            frames: Mutex::new(Vec::new()),
            next_frame: AtomicU64::new(0),
        }
    }

    /// Context without a request-scoped store; accounting is inactive.
    pub fn untracked(kind: ExecutionKind) -> Self {
        Self {
            store: None,
            ..Self::tracked(kind)
        }
    }

    /// Context for one concurrent branch of this request.
    ///
    /// Shares the store, identity and deadline. Starts from a copy of the
    /// current frames; frames entered afterwards on either side stay local.
    pub fn child(&self) -> Self {
        Self {
            kind: self.kind,
            store: self.store.clone(),
            caller: self.caller.clone(),
            correlation_id: self.correlation_id.clone(),
            frames: Mutex::new(self.frames.lock().clone()),
            next_frame: AtomicU64::new(self.next_frame.load(Ordering::SeqCst)),
        }
    }

    pub fn with_caller(mut self, caller: CallerIdentity) -> Self {
        self.caller = caller;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn kind(&self) -> &ExecutionKind {
        &self.kind
    }

    pub fn store(&self) -> Option<&RequestStore> {
        self.store.as_deref()
    }

    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Push a call-site frame for the lifetime of the returned guard.
    ///
    /// Dropping the guard removes exactly this frame, whatever the drop order.
    pub fn enter(&self, label: impl Into<String>) -> FrameGuard<'_> {
        let id = self.next_frame.fetch_add(1, Ordering::SeqCst);
        self.frames.lock().push(Frame {
            id,
            label: label.into(),
        });
        FrameGuard {
            frames: &self.frames,
            id,
        }
    }

    /// Nearest enclosing frame that does not belong to the client layer.
    pub fn current_call_site(&self) -> Option<String> {
        self.frames
            .lock()
            .iter()
            .rev()
            .find(|frame| !frame.label.starts_with(INTERNAL_FRAME_PREFIX))
            .map(|frame| frame.label.clone())
    }

    /// Outermost-first frames with client-layer frames removed, one per line.
    pub fn stack_signature(&self) -> String {
        self.frames
            .lock()
            .iter()
            .filter(|frame| !frame.label.starts_with(INTERNAL_FRAME_PREFIX))
            .map(|frame| frame.label.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Scope marker returned by [`RequestContext::enter`].
#[derive(Debug)]
pub struct FrameGuard<'a> {
    frames: &'a Mutex<Vec<Frame>>,
    id: u64,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let mut frames = self.frames.lock();
        if let Some(index) = frames.iter().rposition(|frame| frame.id == self.id) {
            frames.remove(index);
        }
    }
}
