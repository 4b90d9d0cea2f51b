//! Subscription ledger.
//!
//! A thin layer over [`SubscriptionStore`] that owns the normalization
//! rules for writing provider snapshots locally: rows are keyed by the
//! provider subscription id so repeated writes of the same remote
//! subscription update one row, `trial_end` is cleared unless the
//! subscription is actually trialing, and a cancellation timestamp is
//! never lost once set.

use tracing::debug;

use crate::error::Result;
use crate::gateway::RemoteSubscription;
use crate::storage::{
    unix_now, SubscriptionRecord, SubscriptionStatus, SubscriptionStore,
    DEFAULT_SUBSCRIPTION_KIND,
};

/// The local record of remote subscription state.
#[derive(Clone)]
pub struct SubscriptionLedger<S> {
    store: S,
}

impl<S: SubscriptionStore> SubscriptionLedger<S> {
    /// Create a ledger over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Write a provider snapshot to the ledger.
    ///
    /// Idempotent: the row is keyed by the provider subscription id, so
    /// confirming the same checkout twice or re-syncing the same
    /// subscription updates in place rather than duplicating. The status
    /// string is mapped through [`SubscriptionStatus::from_remote`],
    /// `trial_end` is kept only while trialing, and an existing
    /// `cancellation_effective_at` survives the write.
    pub async fn upsert_from_remote(
        &self,
        user_id: &str,
        plan_id: &str,
        remote: &RemoteSubscription,
    ) -> Result<SubscriptionRecord> {
        let now = unix_now();
        let existing = self.store.get_subscription(&remote.id).await?;

        let status = SubscriptionStatus::from_remote(&remote.status);
        let trial_end = if status == SubscriptionStatus::Trialing {
            remote.trial_end
        } else {
            None
        };

        let record = SubscriptionRecord {
            remote_subscription_id: remote.id.clone(),
            user_id: user_id.to_string(),
            kind: DEFAULT_SUBSCRIPTION_KIND.to_string(),
            plan_id: plan_id.to_string(),
            status,
            price_ref: remote.price_ref.clone(),
            quantity: remote.quantity,
            trial_end,
            current_period_end: remote.current_period_end,
            cancellation_effective_at: existing
                .as_ref()
                .and_then(|r| r.cancellation_effective_at),
            created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.store.upsert_subscription(&record).await?;
        debug!(
            subscription_id = %record.remote_subscription_id,
            user_id = %record.user_id,
            status = %record.status,
            "ledger row written"
        );
        Ok(record)
    }

    /// Mark a ledger row canceled and record when the cancellation takes
    /// effect. A timestamp already present is kept; the first one wins.
    pub async fn mark_canceled(&self, remote_id: &str, effective_at: u64) -> Result<()> {
        let Some(mut record) = self.store.get_subscription(remote_id).await? else {
            // Nothing local to update; the remote cancel already happened.
            debug!(subscription_id = %remote_id, "cancel of unknown ledger row ignored");
            return Ok(());
        };
        record.status = SubscriptionStatus::Canceled;
        record.trial_end = None;
        if record.cancellation_effective_at.is_none() {
            record.cancellation_effective_at = Some(effective_at);
        }
        record.updated_at = unix_now();
        self.store.upsert_subscription(&record).await
    }

    /// The user's current live subscription, if any.
    pub async fn current_for(&self, user_id: &str) -> Result<Option<SubscriptionRecord>> {
        self.store
            .current_for(user_id, DEFAULT_SUBSCRIPTION_KIND)
            .await
    }

    /// How many subscriptions the user has ever held, in any status.
    pub async fn history_count(&self, user_id: &str) -> Result<usize> {
        self.store.history_count(user_id).await
    }

    /// Number of users holding an active subscription on the plan.
    pub async fn active_count_for_plan(&self, plan_id: &str) -> Result<usize> {
        self.store.active_count_for_plan(plan_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test::InMemoryBillingStore;

    fn remote(id: &str, status: &str) -> RemoteSubscription {
        RemoteSubscription {
            id: id.to_string(),
            customer_ref: "cus_1".to_string(),
            status: status.to_string(),
            price_ref: "price_1".to_string(),
            quantity: 1,
            trial_end: Some(1_900_000_000),
            current_period_end: Some(2_000_000_000),
        }
    }

    #[tokio::test]
    async fn repeated_upserts_keep_one_row() {
        let store = InMemoryBillingStore::new();
        let ledger = SubscriptionLedger::new(store.clone());

        ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "trialing"))
            .await
            .unwrap();
        ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "active"))
            .await
            .unwrap();

        assert_eq!(store.subscriptions_for("u1").len(), 1);
        let row = ledger.current_for("u1").await.unwrap().unwrap();
        assert_eq!(row.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn trial_end_cleared_when_not_trialing() {
        let ledger = SubscriptionLedger::new(InMemoryBillingStore::new());

        let row = ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "trialing"))
            .await
            .unwrap();
        assert_eq!(row.trial_end, Some(1_900_000_000));

        let row = ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "active"))
            .await
            .unwrap();
        assert!(row.trial_end.is_none());
    }

    #[tokio::test]
    async fn cancellation_timestamp_survives_later_upserts() {
        let store = InMemoryBillingStore::new();
        let ledger = SubscriptionLedger::new(store.clone());

        ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "active"))
            .await
            .unwrap();
        ledger.mark_canceled("sub_1", 1_950_000_000).await.unwrap();

        // A later snapshot (e.g. the provider still reporting the row
        // until period end) must not clear the timestamp.
        let row = ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "active"))
            .await
            .unwrap();
        assert_eq!(row.cancellation_effective_at, Some(1_950_000_000));

        // And a second cancel keeps the first timestamp.
        ledger.mark_canceled("sub_1", 1_999_999_999).await.unwrap();
        let row = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(row.cancellation_effective_at, Some(1_950_000_000));
    }

    #[tokio::test]
    async fn mark_canceled_on_unknown_row_is_a_no_op() {
        let ledger = SubscriptionLedger::new(InMemoryBillingStore::new());
        assert!(ledger.mark_canceled("sub_missing", 123).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_status_is_not_live() {
        let ledger = SubscriptionLedger::new(InMemoryBillingStore::new());
        ledger
            .upsert_from_remote("u1", "plan_1", &remote("sub_1", "paused"))
            .await
            .unwrap();
        assert!(ledger.current_for("u1").await.unwrap().is_none());
        assert_eq!(ledger.history_count("u1").await.unwrap(), 1);
    }
}
