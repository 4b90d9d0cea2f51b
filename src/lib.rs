//! Subledger - plan catalog and subscription billing reconciliation
//!
//! Subledger keeps a local record of subscription plans and subscriber
//! state consistent with an external billing provider. The local store is
//! the source of truth for descriptive plan data; the provider is the
//! source of truth for payment state. Remote effects are confirmed
//! synchronously — there is no webhook path.
//!
//! # Features
//!
//! - **Plan catalog**: CRUD with validation, archive-vs-delete guards,
//!   and provider product/price sync that tolerates partial failure
//! - **Subscription ledger**: local snapshots of remote subscriptions,
//!   keyed by the provider subscription id for idempotent writes
//! - **Lifecycle**: direct subscribe, trials, hosted checkout with
//!   synchronous confirmation, in-place plan swaps, period-end cancel
//! - **Gateway**: pluggable provider trait with a retrying HTTP
//!   implementation and a scriptable mock for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use subledger::{
//!     BillingConfig, HttpBillingGateway, PlanCatalog, PlanDraft,
//!     BillingPeriod, SubscriptionManager,
//! };
//!
//! # async fn example<S>(store: S) -> subledger::Result<()>
//! # where S: subledger::PlanStore + subledger::SubscriptionStore
//! #     + subledger::AccountStore + Clone {
//! subledger::init_tracing();
//!
//! let gateway = HttpBillingGateway::with_default_config("sk_test_...".to_string())
//!     .map_err(|e| subledger::BillingError::internal(e.to_string()))?;
//!
//! let catalog = PlanCatalog::new(store.clone(), gateway.clone());
//! let draft = PlanDraft::new("Pro", "For growing teams", 1500, BillingPeriod::Monthly)
//!     .features(["unlimited projects"])
//!     .storage_label("50 GB")
//!     .support_label("priority")
//!     .trial(14);
//! let created = catalog.create(draft).await?;
//!
//! let config = BillingConfig::new(
//!     "https://app.example.com/billing/success?session_id={CHECKOUT_SESSION_ID}",
//!     "https://app.example.com/billing/cancel",
//! );
//! let manager = SubscriptionManager::new(store, gateway, config);
//! # let _ = (created, manager);
//! # Ok(())
//! # }
//! ```

#![allow(async_fn_in_trait)] // gateway trait is consumed generically within this crate

pub mod catalog;
pub mod config;
mod error;
pub mod gateway;
pub mod ledger;
pub mod live_gateway;
pub mod plan;
pub mod policy;
pub mod storage;

mod manager;

// Re-exports for public API
pub use catalog::{PlanCatalog, PlanRemoval, PlanWriteResult, SyncOutcome};
pub use config::BillingConfig;
pub use error::{BillingError, Result};
pub use gateway::{
    BillingGateway, CheckoutMetadata, CheckoutSession, CheckoutSessionView,
    CreateCheckoutSessionRequest, CreateCustomerRequest, CreateSubscriptionRequest,
    RemoteSubscription, PAYMENT_STATUS_PAID,
};
pub use ledger::SubscriptionLedger;
pub use live_gateway::{HttpBillingGateway, InvalidApiKeyError, LiveGatewayConfig};
pub use manager::{ConfirmedCheckout, SubscriptionManager};
pub use plan::{BillingPeriod, Plan, PlanDraft, PlanUpdate, UNLIMITED_USERS};
pub use policy::SyncDecision;
pub use storage::{
    AccountStore, BillableAccount, PlanStore, SubscriptionRecord, SubscriptionStatus,
    SubscriptionStore, DEFAULT_SUBSCRIPTION_KIND,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "subledger=debug")
/// - `SUBLEDGER_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("SUBLEDGER_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
