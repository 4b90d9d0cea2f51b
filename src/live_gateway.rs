//! Live billing provider gateway.
//!
//! HTTP implementation of [`BillingGateway`] with retry logic, secure API
//! key handling, and error mapping.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;

use crate::error::{BillingError, Result};
use crate::gateway::{
    BillingGateway, CheckoutSession, CheckoutSessionView, CreateCheckoutSessionRequest,
    CreateCustomerRequest, CreateSubscriptionRequest, RemoteSubscription,
};
use crate::plan::Plan;

/// Metadata key for the local user id.
const META_USER_ID: &str = "user_id";
/// Metadata key for the local plan id.
const META_PLAN_ID: &str = "plan_id";

/// Default provider API base URL.
const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Configuration for the live gateway.
#[derive(Debug, Clone)]
pub struct LiveGatewayConfig {
    /// Maximum number of retry attempts for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Provider API base URL. Override to point at a test server.
    pub api_base: String,
}

impl Default for LiveGatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl LiveGatewayConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retry attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set base delay for exponential backoff.
    #[must_use]
    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set maximum delay between retries.
    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set request timeout.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set the provider API base URL.
    #[must_use]
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

/// Error returned when API key validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidApiKeyError {
    /// Description of why the key is invalid.
    pub reason: String,
}

impl std::fmt::Display for InvalidApiKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid billing API key: {}", self.reason)
    }
}

impl std::error::Error for InvalidApiKeyError {}

/// Validate a provider API key format.
///
/// Valid formats:
/// - `sk_test_*` - Test mode secret key
/// - `sk_live_*` - Live mode secret key
/// - `rk_test_*` - Test mode restricted key
/// - `rk_live_*` - Live mode restricted key
fn validate_api_key(key: &str) -> std::result::Result<(), InvalidApiKeyError> {
    const MIN_KEY_LENGTH: usize = 20;

    if key.is_empty() {
        return Err(InvalidApiKeyError {
            reason: "API key cannot be empty".to_string(),
        });
    }

    if key.len() < MIN_KEY_LENGTH {
        return Err(InvalidApiKeyError {
            reason: format!("API key too short (minimum {MIN_KEY_LENGTH} characters)"),
        });
    }

    let valid_prefixes = ["sk_test_", "sk_live_", "rk_test_", "rk_live_"];
    if !valid_prefixes.iter().any(|prefix| key.starts_with(prefix)) {
        return Err(InvalidApiKeyError {
            reason: "API key must start with sk_test_, sk_live_, rk_test_, or rk_live_"
                .to_string(),
        });
    }

    Ok(())
}

/// Live HTTP gateway for production use.
///
/// Implements [`BillingGateway`] with:
/// - Secure API key handling using `SecretString`
/// - Retry logic with exponential backoff for transient failures
/// - Idempotency key support for mutating operations
/// - Proper error mapping to [`BillingError`]
#[derive(Clone)]
pub struct HttpBillingGateway {
    http: reqwest::Client,
    config: LiveGatewayConfig,
    api_key: SecretString,
}

impl HttpBillingGateway {
    /// Create a new live gateway.
    ///
    /// The API key is validated and stored securely, and won't be exposed
    /// in debug output.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid or the HTTP
    /// client cannot be constructed.
    pub fn new(
        api_key: impl Into<SecretString>,
        config: LiveGatewayConfig,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        let api_key: SecretString = api_key.into();
        validate_api_key(api_key.expose_secret())?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| InvalidApiKeyError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// Create a gateway with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key format is invalid.
    pub fn with_default_config(
        api_key: impl Into<SecretString>,
    ) -> std::result::Result<Self, InvalidApiKeyError> {
        Self::new(api_key, LiveGatewayConfig::default())
    }

    /// Check if the gateway is using a test mode API key.
    #[must_use]
    pub fn is_test_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_test_") || key.starts_with("rk_test_")
    }

    /// Check if the gateway is using a live mode API key.
    #[must_use]
    pub fn is_live_mode(&self) -> bool {
        let key = self.api_key.expose_secret();
        key.starts_with("sk_live_") || key.starts_with("rk_live_")
    }

    /// Get the configured timeout duration.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    /// Generate an idempotency key for retryable mutating operations. The
    /// same key is reused across the retries of one logical call so the
    /// provider deduplicates.
    #[inline]
    fn generate_idempotency_key(operation: &str) -> String {
        format!("{}_{}", operation, uuid::Uuid::new_v4())
    }

    /// POST a form-encoded request and parse the JSON response.
    async fn post_form(
        &self,
        operation: &str,
        path: &str,
        params: Vec<(String, String)>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.config.api_base, path);
        let idempotency_key = Self::generate_idempotency_key(operation);
        let timeout_seconds = self.config.timeout_seconds;

        with_retry(&self.config, operation, || {
            let request = self
                .http
                .post(&url)
                .bearer_auth(self.api_key.expose_secret())
                .header("Idempotency-Key", &idempotency_key)
                .form(&params);
            async move { execute(operation, timeout_seconds, request).await }
        })
        .await
    }

    /// GET a resource and parse the JSON response.
    async fn get(&self, operation: &str, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.config.api_base, path);
        let timeout_seconds = self.config.timeout_seconds;

        with_retry(&self.config, operation, || {
            let request = self
                .http
                .get(&url)
                .bearer_auth(self.api_key.expose_secret());
            async move { execute(operation, timeout_seconds, request).await }
        })
        .await
    }

    /// DELETE a resource and parse the JSON response.
    async fn delete(&self, operation: &str, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.config.api_base, path);
        let timeout_seconds = self.config.timeout_seconds;

        with_retry(&self.config, operation, || {
            let request = self
                .http
                .delete(&url)
                .bearer_auth(self.api_key.expose_secret());
            async move { execute(operation, timeout_seconds, request).await }
        })
        .await
    }
}

// Debug implementation that doesn't expose the API key
impl std::fmt::Debug for HttpBillingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBillingGateway")
            .field("config", &self.config)
            .field("is_test_mode", &self.is_test_mode())
            .finish_non_exhaustive()
    }
}

/// Send one request and map transport and API errors to [`BillingError`].
async fn execute(
    operation: &str,
    timeout_seconds: u64,
    request: reqwest::RequestBuilder,
) -> Result<Value> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            BillingError::provider_timeout(operation, timeout_seconds)
        } else {
            BillingError::provider(operation, format!("request failed: {e}"))
        }
    })?;

    let status = response.status().as_u16();
    let body: Value = response.json().await.map_err(|e| {
        BillingError::provider(operation, format!("invalid JSON response: {e}"))
    })?;

    if (200..300).contains(&status) {
        return Ok(body);
    }

    let message = body
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("unknown provider error")
        .to_string();
    Err(BillingError::provider_http(operation, message, status))
}

/// Execute an async operation with retry logic.
///
/// Retries on rate limits (429), server errors (5xx), and timeouts.
async fn with_retry<T, F, Fut>(
    config: &LiveGatewayConfig,
    operation: &str,
    operation_fn: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempts = 0;

    loop {
        match operation_fn().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() || attempts >= config.max_retries {
                    return Err(e);
                }

                let delay =
                    calculate_backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms);
                tracing::warn!(
                    target: "subledger::gateway",
                    operation = operation,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying provider call after transient error"
                );
                tokio::time::sleep(delay).await;
                attempts += 1;
            }
        }
    }
}

/// Calculate backoff delay with exponential backoff and jitter.
#[inline]
fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);

    // Add jitter (0-25% of delay)
    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

/// Read a required string field from a response body.
fn str_field(operation: &str, body: &Value, pointer: &str) -> Result<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            BillingError::provider(
                operation,
                format!("response missing expected field '{pointer}'"),
            )
        })
}

/// Map a provider subscription object to a [`RemoteSubscription`].
fn parse_remote_subscription(operation: &str, body: &Value) -> Result<RemoteSubscription> {
    // The customer field is a string id, or an object when expanded.
    let customer_ref = match body.get("customer") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Object(_)) => str_field(operation, body, "/customer/id")?,
        _ => {
            return Err(BillingError::provider(
                operation,
                "response missing customer reference",
            ))
        }
    };

    Ok(RemoteSubscription {
        id: str_field(operation, body, "/id")?,
        customer_ref,
        status: str_field(operation, body, "/status")?,
        price_ref: str_field(operation, body, "/items/data/0/price/id")?,
        quantity: body
            .pointer("/items/data/0/quantity")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32,
        trial_end: body.get("trial_end").and_then(Value::as_u64),
        current_period_end: body.get("current_period_end").and_then(Value::as_u64),
    })
}

impl BillingGateway for HttpBillingGateway {
    async fn upsert_product(&self, plan: &Plan) -> Result<String> {
        let params = vec![
            ("name".to_string(), plan.name.clone()),
            ("description".to_string(), plan.description.clone()),
            ("active".to_string(), "true".to_string()),
            (format!("metadata[{META_PLAN_ID}]"), plan.id.clone()),
        ];

        let path = match plan.product_ref {
            Some(ref product_ref) => format!("/v1/products/{product_ref}"),
            None => "/v1/products".to_string(),
        };
        let body = self.post_form("upsert_product", &path, params).await?;
        str_field("upsert_product", &body, "/id")
    }

    async fn upsert_price(&self, plan: &Plan, product_ref: &str) -> Result<String> {
        // Provider prices are immutable; a changed price is a new price
        // object under the same product.
        let params = vec![
            ("product".to_string(), product_ref.to_string()),
            ("currency".to_string(), "usd".to_string()),
            ("unit_amount".to_string(), plan.price_cents.to_string()),
            (
                "recurring[interval]".to_string(),
                plan.period.as_interval().to_string(),
            ),
            (format!("metadata[{META_PLAN_ID}]"), plan.id.clone()),
        ];

        let body = self.post_form("upsert_price", "/v1/prices", params).await?;
        str_field("upsert_price", &body, "/id")
    }

    async fn archive_product(&self, product_ref: &str) -> Result<()> {
        let params = vec![("active".to_string(), "false".to_string())];
        self.post_form(
            "archive_product",
            &format!("/v1/products/{product_ref}"),
            params,
        )
        .await?;
        Ok(())
    }

    async fn create_customer(&self, request: CreateCustomerRequest) -> Result<String> {
        let mut params = vec![
            ("email".to_string(), request.email),
            (format!("metadata[{META_USER_ID}]"), request.user_id),
        ];
        if let Some(name) = request.name {
            params.push(("name".to_string(), name));
        }

        let body = self
            .post_form("create_customer", "/v1/customers", params)
            .await?;
        str_field("create_customer", &body, "/id")
    }

    async fn attach_default_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<()> {
        let params = vec![("customer".to_string(), customer_ref.to_string())];
        self.post_form(
            "attach_payment_method",
            &format!("/v1/payment_methods/{payment_method_ref}/attach"),
            params,
        )
        .await?;

        let params = vec![(
            "invoice_settings[default_payment_method]".to_string(),
            payment_method_ref.to_string(),
        )];
        self.post_form(
            "set_default_payment_method",
            &format!("/v1/customers/{customer_ref}"),
            params,
        )
        .await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession> {
        let params = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("customer".to_string(), request.customer_ref),
            ("line_items[0][price]".to_string(), request.price_ref),
            (
                "line_items[0][quantity]".to_string(),
                request.quantity.to_string(),
            ),
            ("success_url".to_string(), request.success_url),
            ("cancel_url".to_string(), request.cancel_url),
            (
                format!("metadata[{META_USER_ID}]"),
                request.metadata.user_id,
            ),
            (
                format!("metadata[{META_PLAN_ID}]"),
                request.metadata.plan_id,
            ),
        ];

        let body = self
            .post_form("create_checkout_session", "/v1/checkout/sessions", params)
            .await?;
        Ok(CheckoutSession {
            id: str_field("create_checkout_session", &body, "/id")?,
            url: str_field("create_checkout_session", &body, "/url")?,
        })
    }

    async fn retrieve_checkout_session(&self, session_ref: &str) -> Result<CheckoutSessionView> {
        let operation = "retrieve_checkout_session";
        let body = self
            .get(
                operation,
                &format!("/v1/checkout/sessions/{session_ref}?expand[]=subscription"),
            )
            .await?;

        let subscription = match body.get("subscription") {
            Some(sub @ Value::Object(_)) => Some(parse_remote_subscription(operation, sub)?),
            _ => None,
        };

        Ok(CheckoutSessionView {
            id: str_field(operation, &body, "/id")?,
            payment_status: str_field(operation, &body, "/payment_status")?,
            user_id: body
                .pointer(&format!("/metadata/{META_USER_ID}"))
                .and_then(Value::as_str)
                .map(str::to_string),
            plan_id: body
                .pointer(&format!("/metadata/{META_PLAN_ID}"))
                .and_then(Value::as_str)
                .map(str::to_string),
            subscription,
        })
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<RemoteSubscription> {
        let mut params = vec![
            ("customer".to_string(), request.customer_ref),
            ("items[0][price]".to_string(), request.price_ref),
            (
                "items[0][quantity]".to_string(),
                request.quantity.to_string(),
            ),
            (format!("metadata[{META_USER_ID}]"), request.user_id),
            (format!("metadata[{META_PLAN_ID}]"), request.plan_id),
        ];
        if let Some(days) = request.trial_days {
            params.push(("trial_period_days".to_string(), days.to_string()));
        }

        let body = self
            .post_form("create_subscription", "/v1/subscriptions", params)
            .await?;
        parse_remote_subscription("create_subscription", &body)
    }

    async fn swap_subscription_price(
        &self,
        subscription_id: &str,
        new_price_ref: &str,
    ) -> Result<RemoteSubscription> {
        let operation = "swap_subscription_price";

        // The update addresses the existing item by id, keeping the
        // subscription's identity and billing anchor.
        let current = self
            .get(operation, &format!("/v1/subscriptions/{subscription_id}"))
            .await?;
        let item_id = str_field(operation, &current, "/items/data/0/id")?;

        let params = vec![
            ("items[0][id]".to_string(), item_id),
            ("items[0][price]".to_string(), new_price_ref.to_string()),
            (
                "proration_behavior".to_string(),
                "create_prorations".to_string(),
            ),
        ];
        let body = self
            .post_form(
                operation,
                &format!("/v1/subscriptions/{subscription_id}"),
                params,
            )
            .await?;
        parse_remote_subscription(operation, &body)
    }

    async fn cancel_subscription(&self, subscription_id: &str, immediate: bool) -> Result<()> {
        if immediate {
            self.delete(
                "cancel_subscription",
                &format!("/v1/subscriptions/{subscription_id}"),
            )
            .await?;
        } else {
            let params = vec![("cancel_at_period_end".to_string(), "true".to_string())];
            self.post_form(
                "cancel_subscription",
                &format!("/v1/subscriptions/{subscription_id}"),
                params,
            )
            .await?;
        }
        Ok(())
    }
}
