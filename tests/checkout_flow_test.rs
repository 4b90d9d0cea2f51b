//! End-to-end subscription lifecycle tests against the mock gateway:
//! hosted checkout with synchronous confirmation, plan swaps, and
//! cancellation.

use subledger::gateway::test::MockBillingGateway;
use subledger::gateway::CheckoutSessionView;
use subledger::storage::test::{InMemoryBillingStore, TestAccount};
use subledger::{
    BillingConfig, BillingError, BillingPeriod, PlanCatalog, PlanDraft, SubscriptionManager,
    SubscriptionStatus,
};

struct Harness {
    manager: SubscriptionManager<InMemoryBillingStore, MockBillingGateway>,
    catalog: PlanCatalog<InMemoryBillingStore, MockBillingGateway>,
    store: InMemoryBillingStore,
    gateway: MockBillingGateway,
}

async fn harness() -> Harness {
    let store = InMemoryBillingStore::new();
    let gateway = MockBillingGateway::new();
    let catalog = PlanCatalog::new(store.clone(), gateway.clone());
    let config = BillingConfig::new(
        "https://app.example.com/billing/success",
        "https://app.example.com/billing/cancel",
    )
    .allowed_redirect_domains(["example.com"]);
    let manager = SubscriptionManager::new(store.clone(), gateway.clone(), config);
    Harness {
        manager,
        catalog,
        store,
        gateway,
    }
}

async fn seed_free_plan(h: &Harness) -> subledger::Plan {
    h.catalog
        .create(
            PlanDraft::new("Free", "Get started", 0, BillingPeriod::Monthly)
                .features(["1 project"])
                .storage_label("1 GB")
                .support_label("community"),
        )
        .await
        .unwrap()
        .plan
}

async fn seed_paid_plan(h: &Harness, name: &str, cents: i64) -> subledger::Plan {
    h.catalog
        .create(
            PlanDraft::new(name, "A paid tier", cents, BillingPeriod::Monthly)
                .features(["unlimited projects"])
                .storage_label("50 GB")
                .support_label("priority")
                .trial(14),
        )
        .await
        .unwrap()
        .plan
}

#[tokio::test]
async fn checkout_confirmation_reconciles_local_state() {
    let h = harness().await;
    seed_free_plan(&h).await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let session = h
        .manager
        .create_checkout_session(&account, &pro.id)
        .await
        .unwrap();
    assert!(session.url.starts_with("https://"));

    // The customer pays on the provider-hosted page.
    h.gateway
        .complete_checkout(&session.id, pro.price_ref.as_deref().unwrap());

    let confirmed = h.manager.confirm_checkout(&account, &session.id).await.unwrap();
    assert_eq!(confirmed.plan.id, pro.id);
    let record = confirmed.subscription.unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);
    assert_eq!(record.plan_id, pro.id);

    let current = h.manager.current_subscription("u1").await.unwrap().unwrap();
    assert_eq!(current.remote_subscription_id, record.remote_subscription_id);
    let plan = h.manager.current_plan("u1").await.unwrap().unwrap();
    assert_eq!(plan.id, pro.id);
}

#[tokio::test]
async fn unpaid_session_grants_nothing() {
    let h = harness().await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let session = h
        .manager
        .create_checkout_session(&account, &pro.id)
        .await
        .unwrap();

    // Confirm without the payment ever completing.
    let err = h
        .manager
        .confirm_checkout(&account, &session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::CheckoutNotPaid { .. }));

    assert!(h.manager.current_subscription("u1").await.unwrap().is_none());
    assert!(h.manager.current_plan("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn confirming_twice_writes_one_ledger_row() {
    let h = harness().await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let session = h
        .manager
        .create_checkout_session(&account, &pro.id)
        .await
        .unwrap();
    h.gateway
        .complete_checkout(&session.id, pro.price_ref.as_deref().unwrap());

    h.manager.confirm_checkout(&account, &session.id).await.unwrap();
    h.manager.confirm_checkout(&account, &session.id).await.unwrap();

    assert_eq!(h.store.subscriptions_for("u1").len(), 1);
}

#[tokio::test]
async fn session_without_plan_metadata_is_rejected() {
    let h = harness().await;
    seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    h.gateway.add_session(CheckoutSessionView {
        id: "cs_foreign".to_string(),
        payment_status: "paid".to_string(),
        user_id: Some("u1".to_string()),
        plan_id: None,
        subscription: None,
    });

    let err = h
        .manager
        .confirm_checkout(&account, "cs_foreign")
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::CheckoutMetadataMissing { .. }));
}

#[tokio::test]
async fn another_users_session_is_rejected() {
    let h = harness().await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let owner = TestAccount::new("u1");

    let session = h
        .manager
        .create_checkout_session(&owner, &pro.id)
        .await
        .unwrap();
    h.gateway
        .complete_checkout(&session.id, pro.price_ref.as_deref().unwrap());

    let intruder = TestAccount::new("u2");
    let err = h
        .manager
        .confirm_checkout(&intruder, &session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::CheckoutSessionMismatch { .. }));
    assert!(h.manager.current_plan("u2").await.unwrap().is_none());
}

#[tokio::test]
async fn plan_swap_preserves_subscription_identity() {
    let h = harness().await;
    seed_free_plan(&h).await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let business = seed_paid_plan(&h, "Business", 4900).await;
    let account = TestAccount::new("u1");

    let record = h
        .manager
        .subscribe(&account, &pro.id, Some("pm_card"))
        .await
        .unwrap()
        .unwrap();

    let swapped = h
        .manager
        .change_plan(&account, &business.id, None)
        .await
        .unwrap()
        .unwrap();

    // Same remote subscription, new price, one ledger row.
    assert_eq!(
        swapped.remote_subscription_id,
        record.remote_subscription_id
    );
    assert_eq!(
        swapped.price_ref.as_str(),
        business.price_ref.as_deref().unwrap()
    );
    assert_eq!(h.store.subscriptions_for("u1").len(), 1);
    assert_eq!(h.gateway.calls("swap_subscription_price"), 1);
    assert_eq!(h.gateway.calls("create_subscription"), 1);
}

#[tokio::test]
async fn downgrade_to_free_cancels_immediately() {
    let h = harness().await;
    let free = seed_free_plan(&h).await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let record = h
        .manager
        .subscribe(&account, &pro.id, Some("pm_card"))
        .await
        .unwrap()
        .unwrap();

    let result = h.manager.change_plan(&account, &free.id, None).await.unwrap();
    assert!(result.is_none());

    let remote = h
        .gateway
        .subscription(&record.remote_subscription_id)
        .unwrap();
    assert_eq!(remote.status, "canceled");

    let rows = h.store.subscriptions_for("u1");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, SubscriptionStatus::Canceled);
    assert!(rows[0].cancellation_effective_at.is_some());

    let plan = h.manager.current_plan("u1").await.unwrap().unwrap();
    assert_eq!(plan.id, free.id);
}

#[tokio::test]
async fn cancel_takes_effect_at_period_end() {
    let h = harness().await;
    let free = seed_free_plan(&h).await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let record = h
        .manager
        .subscribe(&account, &pro.id, Some("pm_card"))
        .await
        .unwrap()
        .unwrap();
    let period_end = record.current_period_end.unwrap();

    let canceled = h.manager.cancel_subscription("u1").await.unwrap();
    assert_eq!(canceled.status, SubscriptionStatus::Canceled);
    assert_eq!(canceled.cancellation_effective_at, Some(period_end));

    let plan = h.manager.current_plan("u1").await.unwrap().unwrap();
    assert_eq!(plan.id, free.id);
}

#[tokio::test]
async fn cancel_without_subscription_fails_cleanly() {
    let h = harness().await;
    seed_free_plan(&h).await;

    let err = h.manager.cancel_subscription("u1").await.unwrap_err();
    assert!(matches!(err, BillingError::NoSubscription { .. }));
}

#[tokio::test]
async fn cancel_with_misconfigured_free_plan_still_cancels_remotely() {
    let h = harness().await;
    // No free plan seeded at all.
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let record = h
        .manager
        .subscribe(&account, &pro.id, Some("pm_card"))
        .await
        .unwrap()
        .unwrap();

    let err = h.manager.cancel_subscription("u1").await.unwrap_err();
    assert!(matches!(err, BillingError::MissingFreePlan));

    // The provider-side cancellation already happened; only the pointer
    // move failed.
    let remote = h
        .gateway
        .subscription(&record.remote_subscription_id)
        .unwrap();
    assert_eq!(remote.status, "canceled");
    let rows = h.store.subscriptions_for("u1");
    assert_eq!(rows[0].status, SubscriptionStatus::Canceled);
}

#[tokio::test]
async fn trial_history_rule_applies_across_entry_points() {
    let h = harness().await;
    seed_free_plan(&h).await;
    let basic = h
        .catalog
        .create(
            PlanDraft::new("Basic", "No trial here", 900, BillingPeriod::Monthly)
                .features(["3 projects"])
                .storage_label("10 GB")
                .support_label("email"),
        )
        .await
        .unwrap()
        .plan;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    // A paid subscription on a trial-less plan still burns trial
    // eligibility for every other plan.
    h.manager
        .subscribe(&account, &basic.id, Some("pm_card"))
        .await
        .unwrap();
    h.manager.cancel_subscription("u1").await.unwrap();

    let err = h.manager.start_trial(&account, &pro.id).await.unwrap_err();
    assert!(matches!(err, BillingError::TrialNotEligible { .. }));
}

#[tokio::test]
async fn free_subscribe_while_paid_is_rejected() {
    let h = harness().await;
    let free = seed_free_plan(&h).await;
    let pro = seed_paid_plan(&h, "Pro", 1500).await;
    let account = TestAccount::new("u1");

    let record = h
        .manager
        .subscribe(&account, &pro.id, Some("pm_card"))
        .await
        .unwrap()
        .unwrap();

    // A pointer-only move would leave the provider billing forever; the
    // downgrade has to go through change_plan, which cancels remotely.
    let err = h
        .manager
        .subscribe(&account, &free.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadySubscribed { .. }));
    let plan = h.manager.current_plan("u1").await.unwrap().unwrap();
    assert_eq!(plan.id, pro.id);

    h.manager.change_plan(&account, &free.id, None).await.unwrap();
    let remote = h
        .gateway
        .subscription(&record.remote_subscription_id)
        .unwrap();
    assert_eq!(remote.status, "canceled");
}

#[tokio::test]
async fn invalid_redirect_urls_fail_before_provider_call() {
    let store = InMemoryBillingStore::new();
    let gateway = MockBillingGateway::new();
    let catalog = PlanCatalog::new(store.clone(), gateway.clone());
    let config = BillingConfig::new("https://evil.net/steal", "https://evil.net/steal")
        .allowed_redirect_domains(["example.com"]);
    let manager = SubscriptionManager::new(store, gateway.clone(), config);

    let pro = catalog
        .create(
            PlanDraft::new("Pro", "A paid tier", 1500, BillingPeriod::Monthly)
                .features(["x"])
                .storage_label("50 GB")
                .support_label("priority"),
        )
        .await
        .unwrap()
        .plan;
    let calls_after_seed = gateway.total_calls();

    let account = TestAccount::new("u1");
    let err = manager
        .create_checkout_session(&account, &pro.id)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidRedirectUrl { .. }));
    assert_eq!(gateway.total_calls(), calls_after_seed);
}
