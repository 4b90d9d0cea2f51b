//! Plan catalog management.
//!
//! CRUD for plans plus reconciliation with the billing provider. Local
//! writes are the source of truth for descriptive plan state; the
//! provider holds the product/price objects paid subscriptions bill
//! against. A failed provider sync never rolls back a local write — the
//! plan is saved, the failure is reported, and
//! [`PlanCatalog::sync_with_provider`] retries the push later.

use tracing::{info, warn};

use crate::error::{BillingError, Result};
use crate::gateway::BillingGateway;
use crate::plan::{Plan, PlanDraft, PlanUpdate};
use crate::policy;
use crate::storage::{unix_now, PlanStore, SubscriptionStore};

/// Outcome of the provider-sync half of a plan write.
#[derive(Debug)]
pub enum SyncOutcome {
    /// Nothing about the plan required a provider update.
    NotRequired,
    /// The provider was updated and the new references persisted.
    Synced {
        /// What triggered the sync.
        reasons: Vec<String>,
    },
    /// The local write succeeded but the provider push failed. The plan
    /// keeps its previous references until a later sync succeeds.
    Failed {
        /// What triggered the sync.
        reasons: Vec<String>,
        /// The provider error.
        error: BillingError,
    },
}

impl SyncOutcome {
    /// Whether the plan is in step with the provider after this write.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Result of creating or updating a plan.
#[derive(Debug)]
pub struct PlanWriteResult {
    /// The plan as persisted locally.
    pub plan: Plan,
    /// What happened on the provider side.
    pub sync: SyncOutcome,
}

/// Result of removing a plan from sale.
#[derive(Debug)]
pub enum PlanRemoval {
    /// The plan had active subscribers and was archived instead of
    /// deleted.
    Archived(Plan),
    /// The plan had no active subscribers and was hard-deleted.
    Deleted {
        /// Id of the deleted plan.
        plan_id: String,
    },
}

/// Find the unique zero-price plan. Zero or several is a configuration
/// error.
pub(crate) async fn find_free_plan<S: PlanStore>(store: &S) -> Result<Plan> {
    let mut free: Vec<Plan> = store
        .list_all_plans()
        .await?
        .into_iter()
        .filter(Plan::is_free)
        .collect();

    match free.len() {
        1 => Ok(free.remove(0)),
        0 => Err(BillingError::MissingFreePlan),
        count => Err(BillingError::MultipleFreePlans { count }),
    }
}

/// Manages the plan catalog and keeps it reconciled with the provider.
#[derive(Clone)]
pub struct PlanCatalog<S, G> {
    store: S,
    gateway: G,
}

impl<S, G> PlanCatalog<S, G>
where
    S: PlanStore + SubscriptionStore + Clone,
    G: BillingGateway,
{
    /// Create a catalog over the given store and gateway.
    pub fn new(store: S, gateway: G) -> Self {
        Self { store, gateway }
    }

    /// Fetch a plan by id.
    pub async fn get(&self, plan_id: &str) -> Result<Plan> {
        self.store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound {
                plan_id: plan_id.to_string(),
            })
    }

    /// List plans visible for purchase: active and not archived.
    pub async fn list(&self) -> Result<Vec<Plan>> {
        self.store.list_plans().await
    }

    /// List every plan, including inactive and archived ones.
    pub async fn list_all(&self) -> Result<Vec<Plan>> {
        self.store.list_all_plans().await
    }

    /// The unique zero-price plan users land on after cancellation.
    ///
    /// Exactly one must exist; zero or several is a configuration error
    /// and is reported as such rather than picking one arbitrarily.
    pub async fn free_plan(&self) -> Result<Plan> {
        find_free_plan(&self.store).await
    }

    /// Create a plan.
    ///
    /// The draft is validated, persisted, and — when priced — pushed to
    /// the provider. A provider failure leaves the plan stored locally
    /// with no references; the returned [`SyncOutcome`] carries the
    /// error.
    pub async fn create(&self, draft: PlanDraft) -> Result<PlanWriteResult> {
        draft.validate()?;

        let id = format!("plan_{}", uuid::Uuid::new_v4().simple());
        let plan = draft.into_plan(id, unix_now());
        self.store.create_plan(&plan).await?;
        info!(plan_id = %plan.id, name = %plan.name, "plan created");

        if plan.is_free() {
            return Ok(PlanWriteResult {
                plan,
                sync: SyncOutcome::NotRequired,
            });
        }

        let reasons = vec!["new paid plan".to_string()];
        let sync = self.push_to_provider(plan.clone(), reasons).await;
        let plan = match &sync {
            SyncOutcome::Synced { .. } => self.get(&plan.id).await?,
            _ => plan,
        };
        Ok(PlanWriteResult { plan, sync })
    }

    /// Update a plan.
    ///
    /// The update is validated and applied locally first. The provider is
    /// pushed only when a billing-relevant field changed, and only for
    /// priced plans. As with [`create`](PlanCatalog::create), a provider
    /// failure does not undo the local write.
    pub async fn update(&self, plan_id: &str, update: PlanUpdate) -> Result<PlanWriteResult> {
        update.validate()?;

        let old = self.get(plan_id).await?;
        let decision = policy::needs_sync(&old, &update);

        let mut plan = old;
        update.apply_to(&mut plan);
        plan.updated_at = unix_now();
        self.store.update_plan(&plan).await?;

        if !decision.required || plan.is_free() {
            return Ok(PlanWriteResult {
                plan,
                sync: SyncOutcome::NotRequired,
            });
        }

        let sync = self.push_to_provider(plan.clone(), decision.reasons).await;
        let plan = match &sync {
            SyncOutcome::Synced { .. } => self.get(&plan.id).await?,
            _ => plan,
        };
        Ok(PlanWriteResult { plan, sync })
    }

    /// Push a plan's product and price to the provider, retrying a sync
    /// that previously failed or never ran.
    ///
    /// Zero-price plans are rejected before any provider traffic.
    pub async fn sync_with_provider(&self, plan_id: &str) -> Result<Plan> {
        let plan = self.get(plan_id).await?;
        if plan.is_free() {
            return Err(BillingError::PlanNotSyncable {
                plan_id: plan_id.to_string(),
            });
        }

        match self.push_to_provider(plan, vec!["manual sync".to_string()]).await {
            SyncOutcome::Failed { error, .. } => Err(error),
            _ => self.get(plan_id).await,
        }
    }

    /// Remove a plan from sale: archive when it still has active
    /// subscribers, hard-delete when it has none.
    ///
    /// Either way the provider product is archived best-effort so the
    /// plan can no longer be purchased; existing remote subscriptions
    /// keep billing until they end.
    pub async fn archive_or_delete(&self, plan_id: &str) -> Result<PlanRemoval> {
        let plan = self.get(plan_id).await?;
        let active = self.store.active_count_for_plan(plan_id).await?;

        if let Some(ref product_ref) = plan.product_ref {
            if let Err(e) = self.gateway.archive_product(product_ref).await {
                warn!(
                    plan_id = %plan_id,
                    product_ref = %product_ref,
                    error = %e,
                    "failed to archive provider product"
                );
            }
        }

        if policy::can_delete(active) {
            self.store.delete_plan(plan_id).await?;
            info!(plan_id = %plan_id, "plan deleted");
            Ok(PlanRemoval::Deleted {
                plan_id: plan_id.to_string(),
            })
        } else {
            let mut plan = plan;
            plan.is_archived = true;
            plan.is_active = false;
            plan.updated_at = unix_now();
            self.store.update_plan(&plan).await?;
            info!(plan_id = %plan_id, active_subscribers = active, "plan archived");
            Ok(PlanRemoval::Archived(plan))
        }
    }

    /// Flip whether the plan is offered to new subscribers.
    pub async fn toggle_active(&self, plan_id: &str) -> Result<Plan> {
        let mut plan = self.get(plan_id).await?;
        plan.is_active = !plan.is_active;
        plan.updated_at = unix_now();
        self.store.update_plan(&plan).await?;
        Ok(plan)
    }

    /// Flip the archived flag. Archiving takes the plan off sale;
    /// unarchiving puts it back on sale.
    pub async fn toggle_archive(&self, plan_id: &str) -> Result<Plan> {
        let mut plan = self.get(plan_id).await?;
        plan.is_archived = !plan.is_archived;
        plan.is_active = !plan.is_archived;
        plan.updated_at = unix_now();
        self.store.update_plan(&plan).await?;
        Ok(plan)
    }

    /// Push product then price to the provider. References are persisted
    /// only after both succeed, so a half-failed push leaves the stored
    /// references untouched.
    async fn push_to_provider(&self, mut plan: Plan, reasons: Vec<String>) -> SyncOutcome {
        let product_ref = match self.gateway.upsert_product(&plan).await {
            Ok(product_ref) => product_ref,
            Err(error) => {
                warn!(plan_id = %plan.id, error = %error, "provider product sync failed");
                return SyncOutcome::Failed { reasons, error };
            }
        };

        let price_ref = match self.gateway.upsert_price(&plan, &product_ref).await {
            Ok(price_ref) => price_ref,
            Err(error) => {
                warn!(plan_id = %plan.id, error = %error, "provider price sync failed");
                return SyncOutcome::Failed { reasons, error };
            }
        };

        plan.product_ref = Some(product_ref);
        plan.price_ref = Some(price_ref);
        plan.updated_at = unix_now();
        if let Err(error) = self.store.update_plan(&plan).await {
            return SyncOutcome::Failed { reasons, error };
        }

        info!(plan_id = %plan.id, "plan synced with provider");
        SyncOutcome::Synced { reasons }
    }
}
