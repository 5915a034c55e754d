//! Approval store: single-use, TTL-bounded tokens bound to one plan.
//!
//! A token is usable only while unconsumed, unexpired, and presented with
//! the plan it was issued for. Consumption marks the token in place; tokens
//! are never deleted, so a replay reliably reports "already used" instead
//! of "not found". All read-modify-write happens inside one mutex, which
//! makes consume linearizable per token: of two concurrent execute calls
//! citing the same token, exactly one wins.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::TimeDelta;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::types::{now_utc, ApprovalToken};

/// Token TTL in seconds.
const TOKEN_TTL_SECS: i64 = 300;

/// Approval validation failures. Each maps to a 403.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    /// Execution needs a token but none was supplied.
    #[error("Approval token required")]
    Required,
    /// No token with this id was ever issued.
    #[error("Approval token not found")]
    NotFound,
    /// The token was issued for a different plan.
    #[error("Approval token does not match plan")]
    PlanMismatch,
    /// The token has already been consumed.
    #[error("Approval token already used")]
    AlreadyUsed,
    /// The token's TTL has elapsed.
    #[error("Approval token expired")]
    Expired,
}

/// In-memory store of issued approval tokens.
#[derive(Default)]
pub struct ApprovalStore {
    tokens: Mutex<HashMap<Uuid, ApprovalToken>>,
}

impl ApprovalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for `plan_id`, valid for 300 seconds.
    pub fn issue(&self, plan_id: Uuid) -> ApprovalToken {
        let issued_at = now_utc();
        let token = ApprovalToken {
            token_id: Uuid::new_v4(),
            plan_id,
            issued_at,
            expires_at: issued_at
                .checked_add_signed(TimeDelta::seconds(TOKEN_TTL_SECS))
                .unwrap_or(issued_at),
            ttl_seconds: TOKEN_TTL_SECS,
            one_time_use: true,
            consumed_at: None,
        };
        info!(token_id = %token.token_id, plan_id = %plan_id, "approval token issued");
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token.token_id, token.clone());
        token
    }

    /// Consume `token_id` for `plan_id`, atomically.
    ///
    /// Checks run in a fixed order inside the critical section: existence,
    /// plan binding, prior consumption, expiry. On success the token is
    /// marked consumed and the updated copy returned.
    pub fn consume(&self, plan_id: Uuid, token_id: Uuid) -> Result<ApprovalToken, ApprovalError> {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let token = tokens.get_mut(&token_id).ok_or(ApprovalError::NotFound)?;
        if token.plan_id != plan_id {
            return Err(ApprovalError::PlanMismatch);
        }
        if token.consumed_at.is_some() {
            return Err(ApprovalError::AlreadyUsed);
        }
        let now = now_utc();
        if now >= token.expires_at {
            return Err(ApprovalError::Expired);
        }
        token.consumed_at = Some(now);
        info!(token_id = %token_id, plan_id = %plan_id, "approval token consumed");
        Ok(token.clone())
    }

    #[cfg(test)]
    fn backdate(&self, token_id: Uuid, seconds: i64) {
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(token) = tokens.get_mut(&token_id) {
            token.expires_at = now_utc()
                .checked_sub_signed(TimeDelta::seconds(seconds))
                .expect("test: backdate subtraction should not overflow");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_issue_sets_ttl_and_binding() {
        let store = ApprovalStore::new();
        let plan_id = Uuid::new_v4();
        let token = store.issue(plan_id);

        assert_eq!(token.plan_id, plan_id);
        assert_eq!(token.ttl_seconds, 300);
        assert!(token.one_time_use);
        assert!(token.consumed_at.is_none());
        assert_eq!(
            token
                .expires_at
                .signed_duration_since(token.issued_at)
                .num_seconds(),
            300
        );
    }

    #[test]
    fn test_consume_marks_token() {
        let store = ApprovalStore::new();
        let plan_id = Uuid::new_v4();
        let token = store.issue(plan_id);

        let consumed = store.consume(plan_id, token.token_id).expect("consume");
        assert!(consumed.consumed_at.is_some());
    }

    #[test]
    fn test_second_consume_reports_already_used() {
        let store = ApprovalStore::new();
        let plan_id = Uuid::new_v4();
        let token = store.issue(plan_id);

        store
            .consume(plan_id, token.token_id)
            .expect("first consume succeeds");
        assert_eq!(
            store.consume(plan_id, token.token_id),
            Err(ApprovalError::AlreadyUsed)
        );
    }

    #[test]
    fn test_consume_unknown_token() {
        let store = ApprovalStore::new();
        assert_eq!(
            store.consume(Uuid::new_v4(), Uuid::new_v4()),
            Err(ApprovalError::NotFound)
        );
    }

    #[test]
    fn test_consume_with_wrong_plan() {
        let store = ApprovalStore::new();
        let token = store.issue(Uuid::new_v4());
        assert_eq!(
            store.consume(Uuid::new_v4(), token.token_id),
            Err(ApprovalError::PlanMismatch)
        );
    }

    #[test]
    fn test_consume_expired_token() {
        let store = ApprovalStore::new();
        let plan_id = Uuid::new_v4();
        let token = store.issue(plan_id);
        store.backdate(token.token_id, 1);

        assert_eq!(
            store.consume(plan_id, token.token_id),
            Err(ApprovalError::Expired)
        );
    }

    #[test]
    fn test_mismatch_checked_before_consumption_state() {
        // A consumed token presented with the wrong plan still reports the
        // plan mismatch, not "already used".
        let store = ApprovalStore::new();
        let plan_id = Uuid::new_v4();
        let token = store.issue(plan_id);
        store.consume(plan_id, token.token_id).expect("consume");

        assert_eq!(
            store.consume(Uuid::new_v4(), token.token_id),
            Err(ApprovalError::PlanMismatch)
        );
    }

    #[test]
    fn test_concurrent_double_consume_has_one_winner() {
        let store = Arc::new(ApprovalStore::new());
        let plan_id = Uuid::new_v4();
        let token = store.issue(plan_id);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let token_id = token.token_id;
            handles.push(std::thread::spawn(move || {
                store.consume(plan_id, token_id).is_ok()
            }));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().expect("thread join"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1, "exactly one concurrent consume may win");
    }
}
