//! Per-call deadline computation.
//!
//! The effective deadline is the earlier of `now + timeout` and the enclosing
//! web request's own deadline, so no outbound call outlives the request that
//! triggered it. The classification records whether the request deadline
//! shortened the call.

use depot_core::{Clock, DepotError, DepotResult, ExecutionKind, RequestContext};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineType {
    /// Caller's own timeout applied
    Regular,
    /// Shortened by the enclosing request's deadline
    Limited,
}

impl DeadlineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadlineType::Regular => "regular",
            DeadlineType::Limited => "limited",
        }
    }
}

impl fmt::Display for DeadlineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deadline of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// Absolute expiry; `None` means unbounded
    pub expires_at: Option<SystemTime>,
    /// `None` for unbounded calls and background work
    pub kind: Option<DeadlineType>,
}

impl Deadline {
    pub fn unbounded() -> Self {
        Self {
            expires_at: None,
            kind: None,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.kind == Some(DeadlineType::Limited)
    }
}

#[derive(Clone)]
pub struct DeadlineCoordinator {
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for DeadlineCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeadlineCoordinator").finish_non_exhaustive()
    }
}

impl DeadlineCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Deadline for a call with `timeout` inside a request of `kind`.
    ///
    /// A zero timeout means no deadline at all; only background work should
    /// ask for that. A timeout too large to represent is treated the same
    /// way, except that a web request's own deadline still applies.
    pub fn compute_deadline(&self, kind: &ExecutionKind, timeout: Duration) -> Deadline {
        if timeout.is_zero() {
            return Deadline::unbounded();
        }

        let regular = self.clock.now().checked_add(timeout);
        match (kind, regular) {
            (ExecutionKind::Background, regular) => Deadline {
                expires_at: regular,
                kind: None,
            },
            (
                ExecutionKind::Web {
                    deadline: Some(request_deadline),
                },
                regular,
            ) if regular.map_or(true, |regular| *request_deadline < regular) => Deadline {
                expires_at: Some(*request_deadline),
                kind: Some(DeadlineType::Limited),
            },
            (ExecutionKind::Web { .. }, Some(regular)) => Deadline {
                expires_at: Some(regular),
                kind: Some(DeadlineType::Regular),
            },
            (ExecutionKind::Web { .. }, None) => Deadline::unbounded(),
        }
    }

    /// Fail if the enclosing request has already used up its time.
    pub fn ensure_request_deadline_not_exceeded(&self, ctx: &RequestContext) -> DepotResult<()> {
        match ctx.kind().request_deadline() {
            Some(deadline) if self.clock.now() >= deadline => Err(DepotError::deadline_exceeded(
                "request deadline passed before storage call",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::ManualClock;

    const NOW: u64 = 1_700_000_000;

    fn coordinator() -> (DeadlineCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(NOW));
        (DeadlineCoordinator::new(clock.clone()), clock)
    }

    fn at(offset_secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(NOW + offset_secs)
    }

    #[test]
    fn test_request_deadline_limits_call() {
        let (deadlines, _clock) = coordinator();
        let kind = ExecutionKind::Web {
            deadline: Some(at(5)),
        };

        let deadline = deadlines.compute_deadline(&kind, Duration::from_secs(10));
        assert_eq!(deadline.expires_at, Some(at(5)));
        assert_eq!(deadline.kind, Some(DeadlineType::Limited));
        assert!(deadline.is_limited());
    }

    #[test]
    fn test_regular_deadline_without_request_budget() {
        let (deadlines, _clock) = coordinator();
        let kind = ExecutionKind::Web { deadline: None };

        let deadline = deadlines.compute_deadline(&kind, Duration::from_secs(10));
        assert_eq!(deadline.expires_at, Some(at(10)));
        assert_eq!(deadline.kind, Some(DeadlineType::Regular));
    }

    #[test]
    fn test_regular_deadline_when_request_has_more_time() {
        let (deadlines, _clock) = coordinator();
        let kind = ExecutionKind::Web {
            deadline: Some(at(60)),
        };

        let deadline = deadlines.compute_deadline(&kind, Duration::from_secs(10));
        assert_eq!(deadline.expires_at, Some(at(10)));
        assert_eq!(deadline.kind, Some(DeadlineType::Regular));
    }

    #[test]
    fn test_background_has_no_classification() {
        let (deadlines, _clock) = coordinator();

        let deadline = deadlines.compute_deadline(&ExecutionKind::Background, Duration::from_secs(10));
        assert_eq!(deadline.expires_at, Some(at(10)));
        assert_eq!(deadline.kind, None);
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let (deadlines, _clock) = coordinator();
        let kind = ExecutionKind::Web {
            deadline: Some(at(5)),
        };

        assert_eq!(
            deadlines.compute_deadline(&kind, Duration::ZERO),
            Deadline::unbounded()
        );
    }

    #[test]
    fn test_unrepresentable_timeout_does_not_overflow() {
        let (deadlines, _clock) = coordinator();

        assert_eq!(
            deadlines.compute_deadline(&ExecutionKind::Background, Duration::MAX),
            Deadline::unbounded()
        );
        assert_eq!(
            deadlines.compute_deadline(&ExecutionKind::Web { deadline: None }, Duration::MAX),
            Deadline::unbounded()
        );

        let capped = deadlines.compute_deadline(
            &ExecutionKind::Web {
                deadline: Some(at(5)),
            },
            Duration::from_secs(u64::MAX),
        );
        assert_eq!(capped.expires_at, Some(at(5)));
        assert_eq!(capped.kind, Some(DeadlineType::Limited));
    }

    #[test]
    fn test_exceeded_request_deadline_fails_fast() {
        let (deadlines, clock) = coordinator();
        let ctx = RequestContext::web(Some(at(5)));

        deadlines.ensure_request_deadline_not_exceeded(&ctx).unwrap();

        clock.advance(Duration::from_secs(5));
        let err = deadlines
            .ensure_request_deadline_not_exceeded(&ctx)
            .unwrap_err();
        assert!(matches!(err, DepotError::DeadlineExceeded { .. }));

        deadlines
            .ensure_request_deadline_not_exceeded(&RequestContext::background())
            .unwrap();
    }
}
