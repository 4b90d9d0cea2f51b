//! Subscription lifecycle management.
//!
//! [`SubscriptionManager`] drives every state change of a user's
//! subscription: direct subscribe, trial start, hosted checkout, plan
//! change, and cancellation. It composes the [`SubscriptionLedger`] for
//! local state with a [`BillingGateway`] for remote state, and keeps the
//! two consistent by confirming remote effects synchronously — there is
//! no webhook path.

use tracing::{info, warn};

use crate::catalog::find_free_plan;
use crate::config::BillingConfig;
use crate::error::{BillingError, Result};
use crate::gateway::{
    BillingGateway, CheckoutMetadata, CheckoutSession, CreateCheckoutSessionRequest,
    CreateCustomerRequest, CreateSubscriptionRequest, PAYMENT_STATUS_PAID,
};
use crate::ledger::SubscriptionLedger;
use crate::plan::Plan;
use crate::policy;
use crate::storage::{
    unix_now, AccountStore, BillableAccount, PlanStore, SubscriptionRecord, SubscriptionStore,
};

/// Result of confirming a checkout session.
#[derive(Debug)]
pub struct ConfirmedCheckout {
    /// The plan the session purchased.
    pub plan: Plan,
    /// The ledger row written from the session's subscription snapshot,
    /// when the provider reported one.
    pub subscription: Option<SubscriptionRecord>,
}

/// Manages subscription state across the local store and the billing
/// provider.
#[derive(Clone)]
pub struct SubscriptionManager<S, G> {
    store: S,
    ledger: SubscriptionLedger<S>,
    gateway: G,
    config: BillingConfig,
}

impl<S, G> SubscriptionManager<S, G>
where
    S: PlanStore + SubscriptionStore + AccountStore + Clone,
    G: BillingGateway,
{
    /// Create a manager over the given store, gateway, and configuration.
    pub fn new(store: S, gateway: G, config: BillingConfig) -> Self {
        let ledger = SubscriptionLedger::new(store.clone());
        Self {
            store,
            ledger,
            gateway,
            config,
        }
    }

    /// The user's current live subscription, if any.
    pub async fn current_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<SubscriptionRecord>> {
        self.ledger.current_for(user_id).await
    }

    /// The plan the user currently points at, if any.
    pub async fn current_plan(&self, user_id: &str) -> Result<Option<Plan>> {
        match self.store.plan_pointer(user_id).await? {
            Some(plan_id) => self.store.get_plan(&plan_id).await,
            None => Ok(None),
        }
    }

    /// Get the provider customer reference for an account, creating the
    /// customer on first use and persisting the reference.
    pub async fn ensure_customer(&self, account: &impl BillableAccount) -> Result<String> {
        let user_id = account.account_id();
        if let Some(customer_ref) = self.store.customer_ref(&user_id).await? {
            return Ok(customer_ref);
        }

        let customer_ref = self
            .gateway
            .create_customer(CreateCustomerRequest {
                email: account.email(),
                name: account.display_name(),
                user_id: user_id.clone(),
            })
            .await?;
        self.store.set_customer_ref(&user_id, &customer_ref).await?;
        info!(user_id = %user_id, customer_ref = %customer_ref, "provider customer created");
        Ok(customer_ref)
    }

    /// Subscribe an account to a plan.
    ///
    /// Only for accounts with no live subscription; a live row of any
    /// live status rejects the call, and plan moves go through
    /// [`change_plan`](SubscriptionManager::change_plan) instead, so a
    /// double subscribe can never open a second remote subscription.
    ///
    /// A free plan is a pointer update only; no provider traffic and no
    /// ledger row, and `None` is returned. A paid plan requires a synced
    /// plan and a payment method: the method is attached as the
    /// customer's default, the remote subscription is created — with the
    /// plan's trial applied when the account is trial-eligible — and the
    /// resulting snapshot is written to the ledger.
    pub async fn subscribe(
        &self,
        account: &impl BillableAccount,
        plan_id: &str,
        payment_method: Option<&str>,
    ) -> Result<Option<SubscriptionRecord>> {
        let user_id = account.account_id();
        let plan = self.purchasable_plan(plan_id).await?;

        if let Some(current) = self.ledger.current_for(&user_id).await? {
            return Err(BillingError::AlreadySubscribed {
                user_id,
                subscription_id: current.remote_subscription_id,
            });
        }

        if plan.is_free() {
            self.store.set_plan_pointer(&user_id, &plan.id).await?;
            info!(user_id = %user_id, plan_id = %plan.id, "moved to free plan");
            return Ok(None);
        }

        let price_ref = self.synced_price_ref(&plan)?;
        let Some(payment_method) = payment_method else {
            return Err(BillingError::PaymentMethodRequired {
                plan_id: plan.id.clone(),
            });
        };

        let history = self.ledger.history_count(&user_id).await?;
        let trial_days = if policy::trial_eligible(&plan, history) {
            Some(plan.trial_days)
        } else {
            None
        };

        let customer_ref = self.ensure_customer(account).await?;
        self.gateway
            .attach_default_payment_method(&customer_ref, payment_method)
            .await?;

        let remote = self
            .gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_ref,
                price_ref,
                quantity: 1,
                trial_days,
                user_id: user_id.clone(),
                plan_id: plan.id.clone(),
            })
            .await?;

        let record = self
            .ledger
            .upsert_from_remote(&user_id, &plan.id, &remote)
            .await?;
        self.store.set_plan_pointer(&user_id, &plan.id).await?;
        info!(
            user_id = %user_id,
            plan_id = %plan.id,
            subscription_id = %record.remote_subscription_id,
            "subscribed"
        );
        Ok(Some(record))
    }

    /// Start a trial of a plan without a payment method.
    ///
    /// Only users with no subscription history at all are eligible, and
    /// the plan must currently offer a trial. The same rule guards every
    /// entry point, so a user cannot trial twice by switching flows.
    pub async fn start_trial(
        &self,
        account: &impl BillableAccount,
        plan_id: &str,
    ) -> Result<SubscriptionRecord> {
        let user_id = account.account_id();
        let plan = self.purchasable_plan(plan_id).await?;
        let price_ref = self.synced_price_ref(&plan)?;

        let history = self.ledger.history_count(&user_id).await?;
        if !policy::trial_eligible(&plan, history) {
            return Err(BillingError::TrialNotEligible {
                user_id,
                plan_id: plan.id.clone(),
            });
        }

        let customer_ref = self.ensure_customer(account).await?;
        let remote = self
            .gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_ref,
                price_ref,
                quantity: 1,
                trial_days: Some(plan.trial_days),
                user_id: user_id.clone(),
                plan_id: plan.id.clone(),
            })
            .await?;

        let record = self
            .ledger
            .upsert_from_remote(&user_id, &plan.id, &remote)
            .await?;
        self.store.set_plan_pointer(&user_id, &plan.id).await?;
        info!(
            user_id = %user_id,
            plan_id = %plan.id,
            trial_days = plan.trial_days,
            "trial started"
        );
        Ok(record)
    }

    /// Create a provider-hosted checkout session for a paid plan.
    ///
    /// The redirect URLs are validated before any provider call. The
    /// user and plan ids are embedded as session metadata so
    /// [`confirm_checkout`](SubscriptionManager::confirm_checkout) is
    /// self-contained.
    pub async fn create_checkout_session(
        &self,
        account: &impl BillableAccount,
        plan_id: &str,
    ) -> Result<CheckoutSession> {
        self.config.validate()?;

        let user_id = account.account_id();
        let plan = self.purchasable_plan(plan_id).await?;
        let price_ref = self.synced_price_ref(&plan)?;

        let customer_ref = self.ensure_customer(account).await?;
        let session = self
            .gateway
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer_ref,
                price_ref,
                quantity: 1,
                success_url: self.config.success_url().to_string(),
                cancel_url: self.config.cancel_url().to_string(),
                metadata: CheckoutMetadata {
                    user_id: user_id.clone(),
                    plan_id: plan.id.clone(),
                },
            })
            .await?;
        info!(user_id = %user_id, plan_id = %plan.id, session_id = %session.id, "checkout session created");
        Ok(session)
    }

    /// Confirm a completed checkout session and reconcile local state.
    ///
    /// The session is re-read from the provider: it must be paid, must
    /// carry plan metadata, and must belong to the confirming user. The
    /// subscription snapshot, when present, is written to the ledger;
    /// the row is keyed by the remote subscription id, so confirming the
    /// same session twice is harmless.
    pub async fn confirm_checkout(
        &self,
        account: &impl BillableAccount,
        session_ref: &str,
    ) -> Result<ConfirmedCheckout> {
        let user_id = account.account_id();
        let session = self.gateway.retrieve_checkout_session(session_ref).await?;

        if session.payment_status != PAYMENT_STATUS_PAID {
            return Err(BillingError::CheckoutNotPaid {
                session_id: session.id,
                payment_status: session.payment_status,
            });
        }

        let Some(plan_id) = session.plan_id else {
            return Err(BillingError::CheckoutMetadataMissing {
                session_id: session.id,
            });
        };

        if let Some(ref session_user) = session.user_id {
            if *session_user != user_id {
                warn!(
                    session_id = %session.id,
                    "checkout confirmation attempted by a different user"
                );
                return Err(BillingError::CheckoutSessionMismatch {
                    session_id: session.id,
                });
            }
        }

        let plan = self
            .store
            .get_plan(&plan_id)
            .await?
            .ok_or(BillingError::PlanNotFound { plan_id })?;

        let subscription = match session.subscription {
            Some(ref remote) => Some(
                self.ledger
                    .upsert_from_remote(&user_id, &plan.id, remote)
                    .await?,
            ),
            None => None,
        };

        self.store.set_plan_pointer(&user_id, &plan.id).await?;
        info!(
            user_id = %user_id,
            plan_id = %plan.id,
            session_id = %session.id,
            "checkout confirmed"
        );
        Ok(ConfirmedCheckout { plan, subscription })
    }

    /// Move an account to a different plan.
    ///
    /// With a live active or trialing subscription and a paid target,
    /// the remote subscription's price is swapped in place, preserving
    /// its identity. A free target cancels the remote subscription
    /// immediately and becomes a pointer update. With no live
    /// subscription at all, a paid target falls back to the direct
    /// subscribe path and requires a payment method; a live but past-due
    /// subscription can neither be swapped nor replaced and is rejected.
    pub async fn change_plan(
        &self,
        account: &impl BillableAccount,
        plan_id: &str,
        payment_method: Option<&str>,
    ) -> Result<Option<SubscriptionRecord>> {
        let user_id = account.account_id();
        let target = self.purchasable_plan(plan_id).await?;
        let current = self.ledger.current_for(&user_id).await?;

        if target.is_free() {
            if let Some(ref current) = current {
                self.gateway
                    .cancel_subscription(&current.remote_subscription_id, true)
                    .await?;
                self.ledger
                    .mark_canceled(&current.remote_subscription_id, unix_now())
                    .await?;
            }
            self.store.set_plan_pointer(&user_id, &target.id).await?;
            info!(user_id = %user_id, plan_id = %target.id, "downgraded to free plan");
            return Ok(None);
        }

        let price_ref = self.synced_price_ref(&target)?;
        match current {
            Some(ref current) if current.is_active_or_trialing() => {
                let remote = self
                    .gateway
                    .swap_subscription_price(&current.remote_subscription_id, &price_ref)
                    .await?;
                let record = self
                    .ledger
                    .upsert_from_remote(&user_id, &target.id, &remote)
                    .await?;
                self.store.set_plan_pointer(&user_id, &target.id).await?;
                info!(
                    user_id = %user_id,
                    plan_id = %target.id,
                    subscription_id = %record.remote_subscription_id,
                    "plan changed"
                );
                Ok(Some(record))
            }
            _ => self.subscribe(account, plan_id, payment_method).await,
        }
    }

    /// Cancel the user's current subscription at period end.
    ///
    /// The remote subscription keeps billing until the period ends; the
    /// ledger row is marked canceled now with the period end as the
    /// effective timestamp, and the user is pointed at the free plan.
    /// The cancellation itself succeeds even when the free-plan lookup
    /// then fails — that failure is a configuration error, reported, not
    /// a reason to leave the provider billing.
    pub async fn cancel_subscription(&self, user_id: &str) -> Result<SubscriptionRecord> {
        let Some(current) = self.ledger.current_for(user_id).await? else {
            return Err(BillingError::NoSubscription {
                user_id: user_id.to_string(),
            });
        };

        self.gateway
            .cancel_subscription(&current.remote_subscription_id, false)
            .await?;

        let effective_at = current.current_period_end.unwrap_or_else(unix_now);
        self.ledger
            .mark_canceled(&current.remote_subscription_id, effective_at)
            .await?;
        info!(
            user_id = %user_id,
            subscription_id = %current.remote_subscription_id,
            effective_at = effective_at,
            "subscription canceled at period end"
        );

        let free = find_free_plan(&self.store).await?;
        self.store.set_plan_pointer(user_id, &free.id).await?;

        self.store
            .get_subscription(&current.remote_subscription_id)
            .await?
            .ok_or_else(|| BillingError::internal("canceled ledger row disappeared"))
    }

    /// Load a plan and check it is offered for purchase.
    async fn purchasable_plan(&self, plan_id: &str) -> Result<Plan> {
        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or_else(|| BillingError::PlanNotFound {
                plan_id: plan_id.to_string(),
            })?;
        if !plan.is_active || plan.is_archived {
            return Err(BillingError::InvalidPlan {
                reason: format!("plan '{plan_id}' is not available for purchase"),
            });
        }
        Ok(plan)
    }

    /// The provider price reference of a paid plan, required before any
    /// subscription can be created against it.
    fn synced_price_ref(&self, plan: &Plan) -> Result<String> {
        plan.price_ref
            .clone()
            .ok_or_else(|| BillingError::PlanNotConfigured {
                plan_id: plan.id.clone(),
            })
    }
}
