//! Query status transitions.
//!
//! The lifecycle only moves forward:
//!
//! ```text
//! PENDING -> PROCESSING -> AWAITING_REVIEW -> REVIEWED -> COMPLETED
//!    \_____________________^
//! ```
//!
//! Re-entering AWAITING_REVIEW from AWAITING_REVIEW is accepted so a query can
//! be re-triaged or get its suggestion after triage. Every other same-state or
//! backward move is rejected.

use chrono::{DateTime, Utc};

use crate::error::{MedqError, Result};
use crate::models::{Query, QueryStatus};

impl QueryStatus {
    pub fn can_transition_to(self, to: QueryStatus) -> bool {
        use QueryStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, AwaitingReview)
                | (Processing, AwaitingReview)
                | (AwaitingReview, AwaitingReview)
                | (AwaitingReview, Reviewed)
                | (Reviewed, Completed)
        )
    }
}

/// Fails with `InvalidStateTransition` naming both states.
pub fn check_transition(from: QueryStatus, to: QueryStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(MedqError::InvalidStateTransition { from, to })
    }
}

impl Query {
    /// Move to `to`, stamping `updated_at`. Leaves the query untouched on error.
    pub fn transition_to(&mut self, to: QueryStatus, now: DateTime<Utc>) -> Result<()> {
        check_transition(self.status, to)?;
        self.status = to;
        self.updated_at = Some(now);
        Ok(())
    }

    /// Non-mutating variant used inside store transactions.
    pub fn transitioned(&self, to: QueryStatus, now: DateTime<Utc>) -> Result<Query> {
        let mut next = self.clone();
        next.transition_to(to, now)?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn query_in(status: QueryStatus) -> Query {
        let mut q = Query::new(Uuid::new_v4(), "text");
        q.status = status;
        q
    }

    #[test]
    fn test_forward_transitions_allowed() {
        use QueryStatus::*;
        for (from, to) in [
            (Pending, Processing),
            (Pending, AwaitingReview),
            (Processing, AwaitingReview),
            (AwaitingReview, Reviewed),
            (Reviewed, Completed),
        ] {
            assert!(from.can_transition_to(to), "{} -> {}", from, to);
        }
    }

    #[test]
    fn test_no_backward_transition_is_allowed() {
        for from in QueryStatus::ALL {
            for to in QueryStatus::ALL {
                if to.rank() < from.rank() {
                    assert!(!from.can_transition_to(to), "{} -> {}", from, to);
                }
            }
        }
    }

    #[test]
    fn test_reviewed_to_awaiting_review_rejected() {
        let mut q = query_in(QueryStatus::Reviewed);
        let before = q.clone();
        let err = q
            .transition_to(QueryStatus::AwaitingReview, Utc::now())
            .unwrap_err();

        match err {
            MedqError::InvalidStateTransition { from, to } => {
                assert_eq!(from, QueryStatus::Reviewed);
                assert_eq!(to, QueryStatus::AwaitingReview);
            }
            other => panic!("expected InvalidStateTransition, got {:?}", other),
        }
        assert_eq!(q, before, "failed transition must not mutate the query");
    }

    #[test]
    fn test_pending_cannot_skip_to_reviewed() {
        let mut q = query_in(QueryStatus::Pending);
        assert!(q.transition_to(QueryStatus::Reviewed, Utc::now()).is_err());
        assert_eq!(q.status, QueryStatus::Pending);
        assert!(q.updated_at.is_none());
    }

    #[test]
    fn test_transition_stamps_updated_at() {
        let mut q = query_in(QueryStatus::Pending);
        let now = Utc::now();
        q.transition_to(QueryStatus::AwaitingReview, now).unwrap();
        assert_eq!(q.status, QueryStatus::AwaitingReview);
        assert_eq!(q.updated_at, Some(now));
    }

    #[test]
    fn test_awaiting_review_reentry_is_accepted() {
        let mut q = query_in(QueryStatus::AwaitingReview);
        assert!(q.transition_to(QueryStatus::AwaitingReview, Utc::now()).is_ok());
    }

    #[test]
    fn test_completed_is_terminal() {
        for to in QueryStatus::ALL {
            assert!(!QueryStatus::Completed.can_transition_to(to));
        }
    }

    #[test]
    fn test_transitioned_leaves_original_alone() {
        let q = query_in(QueryStatus::AwaitingReview);
        let next = q.transitioned(QueryStatus::Reviewed, Utc::now()).unwrap();
        assert_eq!(q.status, QueryStatus::AwaitingReview);
        assert_eq!(next.status, QueryStatus::Reviewed);
        assert_eq!(next.id, q.id);
    }
}
