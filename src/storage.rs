//! Storage traits for billing data.
//!
//! Three seams separate the core from persistence: [`PlanStore`] for the
//! plan catalog, [`SubscriptionStore`] for the subscription ledger, and
//! [`AccountStore`] for the per-user billing fields (customer reference
//! and plan pointer). Implement them against your database; the
//! [`test::InMemoryBillingStore`] implements all three for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::Plan;

/// Subscription kind stored on ledger rows. A single kind today; the
/// field exists so add-on subscriptions can coexist later.
pub const DEFAULT_SUBSCRIPTION_KIND: &str = "default";

/// Current Unix timestamp in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lifecycle state of a subscription, mapped from the provider's status
/// string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In a free trial period.
    Trialing,
    /// Paid and current.
    Active,
    /// A renewal payment failed; the provider is retrying.
    PastDue,
    /// Canceled, immediately or at a past period end.
    Canceled,
    /// Created but the initial payment never completed.
    Incomplete,
}

impl SubscriptionStatus {
    /// Map a provider status string. Unknown statuses map to `Canceled`
    /// so an unrecognized state never counts as entitled.
    #[must_use]
    pub fn from_remote(status: &str) -> Self {
        match status {
            "trialing" => Self::Trialing,
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "incomplete" => Self::Incomplete,
            _ => Self::Canceled,
        }
    }

    /// Canonical string form, matching the provider's vocabulary.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Incomplete => "incomplete",
        }
    }

    /// Whether this subscription still represents a live billing
    /// relationship. Past-due counts as live: the provider is still
    /// collecting.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Trialing | Self::Active | Self::PastDue)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the subscription ledger, keyed by the provider's
/// subscription id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Provider subscription id. Primary key.
    pub remote_subscription_id: String,
    /// Local user the subscription belongs to.
    pub user_id: String,
    /// Subscription kind; see [`DEFAULT_SUBSCRIPTION_KIND`].
    pub kind: String,
    /// Local plan id resolved from the price reference at upsert time.
    pub plan_id: String,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// Provider price reference the subscription is billed on.
    pub price_ref: String,
    /// Quantity.
    pub quantity: u32,
    /// Trial end (Unix seconds). `None` unless the status is `Trialing`.
    pub trial_end: Option<u64>,
    /// End of the current billing period (Unix seconds).
    pub current_period_end: Option<u64>,
    /// When the cancellation takes (or took) effect. Set once on
    /// cancellation and never cleared afterwards.
    pub cancellation_effective_at: Option<u64>,
    /// When this row was first written (Unix seconds).
    pub created_at: u64,
    /// When this row was last written (Unix seconds).
    pub updated_at: u64,
}

impl SubscriptionRecord {
    /// Whether the subscription is active or trialing, i.e. entitled to
    /// the plan's features and eligible for a plan swap.
    #[must_use]
    pub fn is_active_or_trialing(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

/// A user visible to the billing system.
///
/// Implemented by your application's user type so the billing core can
/// create provider customers without knowing its shape.
pub trait BillableAccount: Send + Sync {
    /// Stable local user id.
    fn account_id(&self) -> String;
    /// Email address for the provider customer record.
    fn email(&self) -> String;
    /// Display name for the provider customer record, if any.
    fn display_name(&self) -> Option<String> {
        None
    }
}

/// Persistence for the plan catalog.
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Fetch a plan by id.
    async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>>;

    /// List plans visible for purchase: active and not archived.
    async fn list_plans(&self) -> Result<Vec<Plan>>;

    /// List every plan, including inactive and archived ones.
    async fn list_all_plans(&self) -> Result<Vec<Plan>>;

    /// Insert a new plan.
    async fn create_plan(&self, plan: &Plan) -> Result<()>;

    /// Overwrite an existing plan.
    async fn update_plan(&self, plan: &Plan) -> Result<()>;

    /// Hard-delete a plan. Callers must check the subscriber guard first.
    async fn delete_plan(&self, plan_id: &str) -> Result<()>;
}

/// Persistence for the subscription ledger.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Fetch a ledger row by provider subscription id.
    async fn get_subscription(&self, remote_id: &str) -> Result<Option<SubscriptionRecord>>;

    /// Insert or overwrite a ledger row, keyed by
    /// `remote_subscription_id`.
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> Result<()>;

    /// The user's most recent live subscription of the given kind, if
    /// any.
    async fn current_for(&self, user_id: &str, kind: &str) -> Result<Option<SubscriptionRecord>>;

    /// Total ledger rows ever recorded for the user, in any status.
    async fn history_count(&self, user_id: &str) -> Result<usize>;

    /// Number of distinct users with an `active` subscription on the
    /// plan.
    async fn active_count_for_plan(&self, plan_id: &str) -> Result<usize>;
}

/// Persistence for per-user billing fields.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The provider customer reference for a user, if one was created.
    async fn customer_ref(&self, user_id: &str) -> Result<Option<String>>;

    /// Persist the provider customer reference for a user.
    async fn set_customer_ref(&self, user_id: &str, customer_ref: &str) -> Result<()>;

    /// The user's current plan pointer, if set.
    async fn plan_pointer(&self, user_id: &str) -> Result<Option<String>>;

    /// Point the user at a plan.
    async fn set_plan_pointer(&self, user_id: &str, plan_id: &str) -> Result<()>;
}

/// In-memory store for testing.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct StoreInner {
        plans: RwLock<HashMap<String, Plan>>,
        subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
        customer_refs: RwLock<HashMap<String, String>>,
        plan_pointers: RwLock<HashMap<String, String>>,
    }

    /// In-memory implementation of all three billing store traits.
    ///
    /// Cloning is cheap and clones share state.
    #[derive(Default, Clone)]
    pub struct InMemoryBillingStore {
        inner: Arc<StoreInner>,
    }

    impl InMemoryBillingStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Number of plans in the store (for test assertions).
        #[must_use]
        pub fn plan_count(&self) -> usize {
            self.inner.plans.read().unwrap().len()
        }

        /// All ledger rows for a user, unordered (for test assertions).
        #[must_use]
        pub fn subscriptions_for(&self, user_id: &str) -> Vec<SubscriptionRecord> {
            self.inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .filter(|r| r.user_id == user_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl PlanStore for InMemoryBillingStore {
        async fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
            Ok(self.inner.plans.read().unwrap().get(plan_id).cloned())
        }

        async fn list_plans(&self) -> Result<Vec<Plan>> {
            let mut plans: Vec<Plan> = self
                .inner
                .plans
                .read()
                .unwrap()
                .values()
                .filter(|p| p.is_active && !p.is_archived)
                .cloned()
                .collect();
            plans.sort_by_key(|p| p.price_cents);
            Ok(plans)
        }

        async fn list_all_plans(&self) -> Result<Vec<Plan>> {
            let mut plans: Vec<Plan> =
                self.inner.plans.read().unwrap().values().cloned().collect();
            plans.sort_by_key(|p| p.price_cents);
            Ok(plans)
        }

        async fn create_plan(&self, plan: &Plan) -> Result<()> {
            self.inner
                .plans
                .write()
                .unwrap()
                .insert(plan.id.clone(), plan.clone());
            Ok(())
        }

        async fn update_plan(&self, plan: &Plan) -> Result<()> {
            self.inner
                .plans
                .write()
                .unwrap()
                .insert(plan.id.clone(), plan.clone());
            Ok(())
        }

        async fn delete_plan(&self, plan_id: &str) -> Result<()> {
            self.inner.plans.write().unwrap().remove(plan_id);
            Ok(())
        }
    }

    #[async_trait]
    impl SubscriptionStore for InMemoryBillingStore {
        async fn get_subscription(&self, remote_id: &str) -> Result<Option<SubscriptionRecord>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .get(remote_id)
                .cloned())
        }

        async fn upsert_subscription(&self, record: &SubscriptionRecord) -> Result<()> {
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(record.remote_subscription_id.clone(), record.clone());
            Ok(())
        }

        async fn current_for(
            &self,
            user_id: &str,
            kind: &str,
        ) -> Result<Option<SubscriptionRecord>> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .filter(|r| r.user_id == user_id && r.kind == kind && r.status.is_live())
                .max_by_key(|r| r.updated_at)
                .cloned())
        }

        async fn history_count(&self, user_id: &str) -> Result<usize> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .filter(|r| r.user_id == user_id)
                .count())
        }

        async fn active_count_for_plan(&self, plan_id: &str) -> Result<usize> {
            Ok(self
                .inner
                .subscriptions
                .read()
                .unwrap()
                .values()
                .filter(|r| r.plan_id == plan_id && r.status == SubscriptionStatus::Active)
                .count())
        }
    }

    #[async_trait]
    impl AccountStore for InMemoryBillingStore {
        async fn customer_ref(&self, user_id: &str) -> Result<Option<String>> {
            Ok(self
                .inner
                .customer_refs
                .read()
                .unwrap()
                .get(user_id)
                .cloned())
        }

        async fn set_customer_ref(&self, user_id: &str, customer_ref: &str) -> Result<()> {
            self.inner
                .customer_refs
                .write()
                .unwrap()
                .insert(user_id.to_string(), customer_ref.to_string());
            Ok(())
        }

        async fn plan_pointer(&self, user_id: &str) -> Result<Option<String>> {
            Ok(self
                .inner
                .plan_pointers
                .read()
                .unwrap()
                .get(user_id)
                .cloned())
        }

        async fn set_plan_pointer(&self, user_id: &str, plan_id: &str) -> Result<()> {
            self.inner
                .plan_pointers
                .write()
                .unwrap()
                .insert(user_id.to_string(), plan_id.to_string());
            Ok(())
        }
    }

    /// Simple account for tests.
    #[derive(Debug, Clone)]
    pub struct TestAccount {
        pub id: String,
        pub email: String,
        pub name: Option<String>,
    }

    impl TestAccount {
        #[must_use]
        pub fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                email: format!("{id}@example.com"),
                name: Some(format!("User {id}")),
            }
        }
    }

    impl BillableAccount for TestAccount {
        fn account_id(&self) -> String {
            self.id.clone()
        }

        fn email(&self) -> String {
            self.email.clone()
        }

        fn display_name(&self) -> Option<String> {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::InMemoryBillingStore;
    use super::*;

    fn record(remote_id: &str, user_id: &str, plan_id: &str, status: SubscriptionStatus) -> SubscriptionRecord {
        SubscriptionRecord {
            remote_subscription_id: remote_id.to_string(),
            user_id: user_id.to_string(),
            kind: DEFAULT_SUBSCRIPTION_KIND.to_string(),
            plan_id: plan_id.to_string(),
            status,
            price_ref: "price_1".to_string(),
            quantity: 1,
            trial_end: None,
            current_period_end: Some(4_102_444_800),
            cancellation_effective_at: None,
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn status_maps_unknown_to_canceled() {
        assert_eq!(
            SubscriptionStatus::from_remote("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_remote("paused"),
            SubscriptionStatus::Canceled
        );
        assert_eq!(
            SubscriptionStatus::from_remote(""),
            SubscriptionStatus::Canceled
        );
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
            SubscriptionStatus::Incomplete,
        ] {
            assert_eq!(SubscriptionStatus::from_remote(status.as_str()), status);
        }
    }

    #[test]
    fn past_due_is_live_but_not_entitled_to_swap() {
        assert!(SubscriptionStatus::PastDue.is_live());
        let rec = record("sub_1", "u1", "plan_1", SubscriptionStatus::PastDue);
        assert!(!rec.is_active_or_trialing());
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_remote_id() {
        let store = InMemoryBillingStore::new();
        let rec = record("sub_1", "u1", "plan_1", SubscriptionStatus::Active);
        store.upsert_subscription(&rec).await.unwrap();

        let mut updated = rec.clone();
        updated.status = SubscriptionStatus::PastDue;
        updated.updated_at = 200;
        store.upsert_subscription(&updated).await.unwrap();

        assert_eq!(store.subscriptions_for("u1").len(), 1);
        let stored = store.get_subscription("sub_1").await.unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::PastDue);
    }

    #[tokio::test]
    async fn current_for_skips_dead_rows() {
        let store = InMemoryBillingStore::new();
        let mut canceled = record("sub_1", "u1", "plan_1", SubscriptionStatus::Canceled);
        canceled.updated_at = 300;
        store.upsert_subscription(&canceled).await.unwrap();
        assert!(store
            .current_for("u1", DEFAULT_SUBSCRIPTION_KIND)
            .await
            .unwrap()
            .is_none());

        let live = record("sub_2", "u1", "plan_2", SubscriptionStatus::Active);
        store.upsert_subscription(&live).await.unwrap();
        let current = store
            .current_for("u1", DEFAULT_SUBSCRIPTION_KIND)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.remote_subscription_id, "sub_2");
    }

    #[tokio::test]
    async fn history_counts_all_statuses() {
        let store = InMemoryBillingStore::new();
        store
            .upsert_subscription(&record("sub_1", "u1", "plan_1", SubscriptionStatus::Canceled))
            .await
            .unwrap();
        store
            .upsert_subscription(&record("sub_2", "u1", "plan_2", SubscriptionStatus::Active))
            .await
            .unwrap();
        store
            .upsert_subscription(&record("sub_3", "u2", "plan_1", SubscriptionStatus::Active))
            .await
            .unwrap();

        assert_eq!(store.history_count("u1").await.unwrap(), 2);
        assert_eq!(store.history_count("u2").await.unwrap(), 1);
        assert_eq!(store.history_count("u3").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn active_count_ignores_trialing_and_canceled() {
        let store = InMemoryBillingStore::new();
        store
            .upsert_subscription(&record("sub_1", "u1", "plan_1", SubscriptionStatus::Active))
            .await
            .unwrap();
        store
            .upsert_subscription(&record("sub_2", "u2", "plan_1", SubscriptionStatus::Trialing))
            .await
            .unwrap();
        store
            .upsert_subscription(&record("sub_3", "u3", "plan_1", SubscriptionStatus::Canceled))
            .await
            .unwrap();

        assert_eq!(store.active_count_for_plan("plan_1").await.unwrap(), 1);
    }
}
