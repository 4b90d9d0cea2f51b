//! Billing provider gateway contract.
//!
//! The billing provider is the external service of record for payment
//! collection, products/prices, checkout sessions, and remote subscription
//! state. The core depends only on this trait; see
//! [`HttpBillingGateway`](crate::live_gateway::HttpBillingGateway) for the
//! production implementation and [`test::MockBillingGateway`] for tests.
//!
//! Every method returns a structured [`Result`] — provider failures never
//! panic across this boundary.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::Plan;

/// Payment status value a checkout session must reach before confirmation
/// is accepted.
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Operations the core requires from the billing provider.
#[allow(async_fn_in_trait)]
pub trait BillingGateway: Send + Sync {
    /// Create or update the provider product for a plan, returning the
    /// product reference.
    async fn upsert_product(&self, plan: &Plan) -> Result<String>;

    /// Create or update the provider price for a plan under the given
    /// product, returning the price reference.
    async fn upsert_price(&self, plan: &Plan, product_ref: &str) -> Result<String>;

    /// Archive the provider product. Existing subscriptions keep working.
    async fn archive_product(&self, product_ref: &str) -> Result<()>;

    /// Create a provider customer, returning the customer reference.
    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String>;

    /// Attach a payment method to a customer and make it the default.
    async fn attach_default_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<()>;

    /// Create a provider-hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession>;

    /// Retrieve a checkout session, including its payment status, the
    /// metadata embedded at creation, and the resulting subscription
    /// snapshot if one exists.
    async fn retrieve_checkout_session(&self, session_ref: &str) -> Result<CheckoutSessionView>;

    /// Create a remote subscription for a customer.
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription>;

    /// Swap the price on an existing remote subscription, keeping its
    /// identity.
    async fn swap_subscription_price(
        &self,
        subscription_id: &str,
        new_price_ref: &str,
    ) -> Result<RemoteSubscription>;

    /// Cancel a remote subscription, immediately or at period end.
    async fn cancel_subscription(&self, subscription_id: &str, immediate: bool) -> Result<()>;
}

/// Request to create a provider customer.
#[derive(Debug, Clone)]
pub struct CreateCustomerRequest {
    /// Customer email address.
    pub email: String,
    /// Customer display name.
    pub name: Option<String>,
    /// Local user id, embedded as customer metadata.
    pub user_id: String,
}

/// Metadata embedded on checkout sessions at creation time.
///
/// Confirmation reads these back from the provider, which is what makes
/// the checkout flow self-contained without webhooks or server-side
/// session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    /// Local user id.
    pub user_id: String,
    /// Local plan id being purchased.
    pub plan_id: String,
}

/// Request to create a checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionRequest {
    /// Provider customer reference.
    pub customer_ref: String,
    /// Provider price reference for the plan.
    pub price_ref: String,
    /// Quantity; 1 for per-tenant billing.
    pub quantity: u32,
    /// URL to redirect to after payment.
    pub success_url: String,
    /// URL to redirect to on abandonment.
    pub cancel_url: String,
    /// Metadata embedded on the session.
    pub metadata: CheckoutMetadata,
}

/// A created checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    /// Provider session reference.
    pub id: String,
    /// URL to redirect the customer to.
    pub url: String,
}

/// A retrieved checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutSessionView {
    /// Provider session reference.
    pub id: String,
    /// Provider payment status, stored verbatim. Confirmation requires
    /// [`PAYMENT_STATUS_PAID`].
    pub payment_status: String,
    /// Local user id from the session metadata, if present.
    pub user_id: Option<String>,
    /// Local plan id from the session metadata, if present.
    pub plan_id: Option<String>,
    /// Snapshot of the subscription the session produced, if any.
    pub subscription: Option<RemoteSubscription>,
}

/// Request to create a remote subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionRequest {
    /// Provider customer reference.
    pub customer_ref: String,
    /// Provider price reference.
    pub price_ref: String,
    /// Quantity; 1 for per-tenant billing.
    pub quantity: u32,
    /// Trial length in days; `None` starts the subscription as paid.
    pub trial_days: Option<u32>,
    /// Local user id, embedded as subscription metadata.
    pub user_id: String,
    /// Local plan id, embedded as subscription metadata.
    pub plan_id: String,
}

/// Snapshot of a remote subscription as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSubscription {
    /// Provider subscription id.
    pub id: String,
    /// Provider customer reference.
    pub customer_ref: String,
    /// Provider status string, verbatim (e.g. "trialing", "active",
    /// "past_due", "canceled", "incomplete").
    pub status: String,
    /// Provider price reference the subscription is billed on.
    pub price_ref: String,
    /// Quantity.
    pub quantity: u32,
    /// Trial end timestamp (Unix seconds), set while trialing.
    pub trial_end: Option<u64>,
    /// End of the current billing period (Unix seconds).
    pub current_period_end: Option<u64>,
}

/// Mock billing gateway for testing.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use super::*;
    use crate::error::BillingError;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct MockGatewayInner {
        counter: AtomicU64,
        products: RwLock<HashMap<String, bool>>, // product_ref -> active
        subscriptions: RwLock<HashMap<String, RemoteSubscription>>,
        sessions: RwLock<HashMap<String, CheckoutSessionView>>,
        customers: RwLock<HashMap<String, CreateCustomerRequest>>,
        payment_methods: RwLock<HashMap<String, String>>, // customer_ref -> pm
        failures: RwLock<HashSet<String>>,
        calls: RwLock<Vec<String>>,
    }

    /// In-memory billing provider.
    ///
    /// Operations can be scripted to fail by name via [`fail_on`], and
    /// every call is recorded so tests can assert that a guard rejected an
    /// operation before any provider traffic.
    ///
    /// [`fail_on`]: MockBillingGateway::fail_on
    #[derive(Default, Clone)]
    pub struct MockBillingGateway {
        inner: Arc<MockGatewayInner>,
    }

    impl MockBillingGateway {
        /// Create a new mock gateway.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the named operation fail until [`clear_failures`] is called.
        ///
        /// [`clear_failures`]: MockBillingGateway::clear_failures
        pub fn fail_on(&self, operation: &str) {
            self.inner
                .failures
                .write()
                .unwrap()
                .insert(operation.to_string());
        }

        /// Clear all scripted failures.
        pub fn clear_failures(&self) {
            self.inner.failures.write().unwrap().clear();
        }

        /// Number of calls made to the named operation.
        #[must_use]
        pub fn calls(&self, operation: &str) -> usize {
            self.inner
                .calls
                .read()
                .unwrap()
                .iter()
                .filter(|c| *c == operation)
                .count()
        }

        /// Total number of provider calls made.
        #[must_use]
        pub fn total_calls(&self) -> usize {
            self.inner.calls.read().unwrap().len()
        }

        /// Get a remote subscription by id (for test assertions).
        #[must_use]
        pub fn subscription(&self, id: &str) -> Option<RemoteSubscription> {
            self.inner.subscriptions.read().unwrap().get(id).cloned()
        }

        /// Check whether a product is archived.
        #[must_use]
        pub fn product_archived(&self, product_ref: &str) -> bool {
            self.inner
                .products
                .read()
                .unwrap()
                .get(product_ref)
                .map(|active| !active)
                .unwrap_or(false)
        }

        /// Simulate the customer completing payment on a checkout session:
        /// marks the session paid and attaches a subscription snapshot.
        pub fn complete_checkout(&self, session_ref: &str, price_ref: &str) -> RemoteSubscription {
            let sub = RemoteSubscription {
                id: self.next_id("sub"),
                customer_ref: "cus_checkout".to_string(),
                status: "active".to_string(),
                price_ref: price_ref.to_string(),
                quantity: 1,
                trial_end: None,
                current_period_end: Some(4_102_444_800),
            };
            let mut sessions = self.inner.sessions.write().unwrap();
            if let Some(view) = sessions.get_mut(session_ref) {
                view.payment_status = PAYMENT_STATUS_PAID.to_string();
                view.subscription = Some(sub.clone());
            }
            sub
        }

        /// Register a session directly (for confirmation edge cases such
        /// as missing metadata).
        pub fn add_session(&self, view: CheckoutSessionView) {
            self.inner
                .sessions
                .write()
                .unwrap()
                .insert(view.id.clone(), view);
        }

        fn next_id(&self, prefix: &str) -> String {
            format!(
                "{prefix}_test_{}",
                self.inner.counter.fetch_add(1, Ordering::SeqCst)
            )
        }

        fn record(&self, operation: &str) -> Result<()> {
            self.inner.calls.write().unwrap().push(operation.to_string());
            if self.inner.failures.read().unwrap().contains(operation) {
                return Err(BillingError::provider_http(
                    operation,
                    "scripted failure",
                    502,
                ));
            }
            Ok(())
        }
    }

    impl BillingGateway for MockBillingGateway {
        async fn upsert_product(&self, plan: &Plan) -> Result<String> {
            self.record("upsert_product")?;
            let product_ref = plan
                .product_ref
                .clone()
                .unwrap_or_else(|| self.next_id("prod"));
            self.inner
                .products
                .write()
                .unwrap()
                .insert(product_ref.clone(), true);
            Ok(product_ref)
        }

        async fn upsert_price(&self, _plan: &Plan, _product_ref: &str) -> Result<String> {
            self.record("upsert_price")?;
            Ok(self.next_id("price"))
        }

        async fn archive_product(&self, product_ref: &str) -> Result<()> {
            self.record("archive_product")?;
            self.inner
                .products
                .write()
                .unwrap()
                .insert(product_ref.to_string(), false);
            Ok(())
        }

        async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
            self.record("create_customer")?;
            let id = self.next_id("cus");
            self.inner
                .customers
                .write()
                .unwrap()
                .insert(id.clone(), request);
            Ok(id)
        }

        async fn attach_default_payment_method(
            &self,
            customer_ref: &str,
            payment_method_ref: &str,
        ) -> Result<()> {
            self.record("attach_default_payment_method")?;
            self.inner
                .payment_methods
                .write()
                .unwrap()
                .insert(customer_ref.to_string(), payment_method_ref.to_string());
            Ok(())
        }

        async fn create_checkout_session(
            &self,
            request: CreateCheckoutSessionRequest,
        ) -> Result<CheckoutSession> {
            self.record("create_checkout_session")?;
            let id = self.next_id("cs");
            let session = CheckoutSession {
                id: id.clone(),
                url: format!("https://billing.example.com/pay/{id}"),
            };
            self.inner.sessions.write().unwrap().insert(
                id.clone(),
                CheckoutSessionView {
                    id,
                    payment_status: "unpaid".to_string(),
                    user_id: Some(request.metadata.user_id),
                    plan_id: Some(request.metadata.plan_id),
                    subscription: None,
                },
            );
            Ok(session)
        }

        async fn retrieve_checkout_session(
            &self,
            session_ref: &str,
        ) -> Result<CheckoutSessionView> {
            self.record("retrieve_checkout_session")?;
            self.inner
                .sessions
                .read()
                .unwrap()
                .get(session_ref)
                .cloned()
                .ok_or_else(|| {
                    BillingError::provider_http(
                        "retrieve_checkout_session",
                        format!("no such session: {session_ref}"),
                        404,
                    )
                })
        }

        async fn create_subscription(
            &self,
            request: CreateSubscriptionRequest,
        ) -> Result<RemoteSubscription> {
            self.record("create_subscription")?;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let (status, trial_end) = match request.trial_days {
                Some(days) => ("trialing", Some(now + u64::from(days) * 86_400)),
                None => ("active", None),
            };
            let sub = RemoteSubscription {
                id: self.next_id("sub"),
                customer_ref: request.customer_ref,
                status: status.to_string(),
                price_ref: request.price_ref,
                quantity: request.quantity,
                trial_end,
                current_period_end: Some(now + 30 * 86_400),
            };
            self.inner
                .subscriptions
                .write()
                .unwrap()
                .insert(sub.id.clone(), sub.clone());
            Ok(sub)
        }

        async fn swap_subscription_price(
            &self,
            subscription_id: &str,
            new_price_ref: &str,
        ) -> Result<RemoteSubscription> {
            self.record("swap_subscription_price")?;
            let mut subs = self.inner.subscriptions.write().unwrap();
            let sub = subs.get_mut(subscription_id).ok_or_else(|| {
                BillingError::provider_http(
                    "swap_subscription_price",
                    format!("no such subscription: {subscription_id}"),
                    404,
                )
            })?;
            sub.price_ref = new_price_ref.to_string();
            sub.status = "active".to_string();
            sub.trial_end = None;
            Ok(sub.clone())
        }

        async fn cancel_subscription(
            &self,
            subscription_id: &str,
            _immediate: bool,
        ) -> Result<()> {
            self.record("cancel_subscription")?;
            let mut subs = self.inner.subscriptions.write().unwrap();
            let sub = subs.get_mut(subscription_id).ok_or_else(|| {
                BillingError::provider_http(
                    "cancel_subscription",
                    format!("no such subscription: {subscription_id}"),
                    404,
                )
            })?;
            sub.status = "canceled".to_string();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockBillingGateway;
    use super::*;
    use crate::plan::{BillingPeriod, PlanDraft};

    fn plan() -> Plan {
        PlanDraft::new("Pro", "desc", 1500, BillingPeriod::Monthly)
            .features(["a"])
            .storage_label("10 GB")
            .support_label("email")
            .into_plan("plan_1".to_string(), 0)
    }

    #[tokio::test]
    async fn mock_scripted_failure() {
        let gateway = MockBillingGateway::new();
        gateway.fail_on("upsert_price");

        let product = gateway.upsert_product(&plan()).await.unwrap();
        let err = gateway.upsert_price(&plan(), &product).await.unwrap_err();
        assert!(err.is_retryable());

        gateway.clear_failures();
        assert!(gateway.upsert_price(&plan(), &product).await.is_ok());
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let gateway = MockBillingGateway::new();
        let _ = gateway.upsert_product(&plan()).await;
        let _ = gateway.upsert_product(&plan()).await;
        assert_eq!(gateway.calls("upsert_product"), 2);
        assert_eq!(gateway.calls("upsert_price"), 0);
    }

    #[tokio::test]
    async fn checkout_session_round_trip() {
        let gateway = MockBillingGateway::new();
        let session = gateway
            .create_checkout_session(CreateCheckoutSessionRequest {
                customer_ref: "cus_1".to_string(),
                price_ref: "price_1".to_string(),
                quantity: 1,
                success_url: "https://app.example.com/done".to_string(),
                cancel_url: "https://app.example.com/cancel".to_string(),
                metadata: CheckoutMetadata {
                    user_id: "user_1".to_string(),
                    plan_id: "plan_1".to_string(),
                },
            })
            .await
            .unwrap();

        let view = gateway
            .retrieve_checkout_session(&session.id)
            .await
            .unwrap();
        assert_eq!(view.payment_status, "unpaid");
        assert_eq!(view.plan_id.as_deref(), Some("plan_1"));
        assert!(view.subscription.is_none());

        gateway.complete_checkout(&session.id, "price_1");
        let view = gateway
            .retrieve_checkout_session(&session.id)
            .await
            .unwrap();
        assert_eq!(view.payment_status, PAYMENT_STATUS_PAID);
        assert!(view.subscription.is_some());
    }

    #[tokio::test]
    async fn trial_subscription_gets_trial_end() {
        let gateway = MockBillingGateway::new();
        let sub = gateway
            .create_subscription(CreateSubscriptionRequest {
                customer_ref: "cus_1".to_string(),
                price_ref: "price_1".to_string(),
                quantity: 1,
                trial_days: Some(14),
                user_id: "user_1".to_string(),
                plan_id: "plan_1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(sub.status, "trialing");
        assert!(sub.trial_end.is_some());
    }
}
