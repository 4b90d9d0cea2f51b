//! Reconciliation policy.
//!
//! Pure decision logic with no I/O: whether a plan edit requires a
//! provider sync, whether a user may start a trial, and whether a plan may
//! be hard-deleted. Keeping these decisions out of the orchestration code
//! makes them testable without a store or a gateway and guarantees every
//! call site applies the same rule.

use crate::plan::{Plan, PlanUpdate};

/// Outcome of a sync-required check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct SyncDecision {
    /// Whether the provider must be updated.
    pub required: bool,
    /// Human-readable reasons, used for operator-facing messages.
    pub reasons: Vec<String>,
}

impl SyncDecision {
    /// A decision that no sync is needed.
    pub fn not_required() -> Self {
        Self {
            required: false,
            reasons: Vec::new(),
        }
    }
}

/// Decide whether a plan update requires a provider sync.
///
/// A sync is required when the price, billing period, name, or description
/// changes, or when either trial field is present in the update payload at
/// all — the provider's trial configuration is re-pushed even if the local
/// value happens to match.
pub fn needs_sync(old: &Plan, update: &PlanUpdate) -> SyncDecision {
    let mut reasons = Vec::new();

    if let Some(cents) = update.price_cents {
        if cents != old.price_cents {
            reasons.push(format!(
                "price changed from {} to {} cents",
                old.price_cents, cents
            ));
        }
    }
    if let Some(period) = update.period {
        if period != old.period {
            reasons.push(format!(
                "billing period changed from {} to {}",
                old.period, period
            ));
        }
    }
    if let Some(ref name) = update.name {
        if *name != old.name {
            reasons.push("name changed".to_string());
        }
    }
    if let Some(ref description) = update.description {
        if *description != old.description {
            reasons.push("description changed".to_string());
        }
    }
    if update.touches_trial() {
        reasons.push("trial configuration updated".to_string());
    }

    SyncDecision {
        required: !reasons.is_empty(),
        reasons,
    }
}

/// Decide whether a user may start a trial of a plan.
///
/// The plan must structurally offer a trial, the trial must be currently
/// enabled with a positive length, and the user must have no subscription
/// history at all — a user who has ever held a subscription (trial or
/// paid, on any plan) is never offered another trial. The same rule
/// applies at every entry point.
#[must_use]
pub fn trial_eligible(plan: &Plan, history_count: usize) -> bool {
    plan.offers_trial() && history_count == 0
}

/// Decide whether a plan may be hard-deleted.
///
/// Deletion is allowed only when no subscriber holds an active remote
/// subscription on the plan. This guard is unconditional.
#[must_use]
pub fn can_delete(active_subscriber_count: usize) -> bool {
    active_subscriber_count == 0
}
