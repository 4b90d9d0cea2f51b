//! Billing error types.
//!
//! Every fallible operation in this crate returns [`Result`]. Errors fall
//! into four groups: validation (rejected before any I/O), preconditions
//! (invariant guards rejected before any provider call), provider errors
//! (the remote billing service failed or rejected a request), and
//! consistency/configuration errors (explicit, descriptive, never
//! silently defaulted).

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BillingError>;

/// The error type for billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    // Validation errors
    /// Plan input failed validation before any I/O.
    #[error("Invalid plan: {reason}")]
    InvalidPlan { reason: String },

    /// A redirect URL failed validation.
    #[error("Invalid redirect URL '{url}': {reason}")]
    InvalidRedirectUrl { url: String, reason: String },

    // Lookup errors
    /// The specified plan does not exist.
    #[error("Plan not found: {plan_id}")]
    PlanNotFound { plan_id: String },

    /// No live subscription exists for the user.
    #[error("No live subscription found for user '{user_id}'")]
    NoSubscription { user_id: String },

    // Precondition errors (invariant guards, rejected before any remote call)
    /// The plan has a price but was never synced to the provider.
    #[error("Plan '{plan_id}' is not configured for subscriptions")]
    PlanNotConfigured { plan_id: String },

    /// Free plans have no remote representation and cannot be synced.
    #[error("Plan '{plan_id}' is free and never needs a provider sync")]
    PlanNotSyncable { plan_id: String },

    /// The user already holds a live subscription; plan moves go through
    /// the change-plan flow instead.
    #[error("User '{user_id}' already has a live subscription '{subscription_id}'")]
    AlreadySubscribed {
        user_id: String,
        subscription_id: String,
    },

    /// A paid subscription requires a payment method.
    #[error("A payment method is required to subscribe to plan '{plan_id}'")]
    PaymentMethodRequired { plan_id: String },

    /// The trial eligibility policy rejected the request.
    #[error("User '{user_id}' is not eligible for a trial of plan '{plan_id}'")]
    TrialNotEligible { user_id: String, plan_id: String },

    // Consistency errors
    /// The checkout session has not been paid.
    #[error("Checkout session '{session_id}' is not paid (payment status: {payment_status})")]
    CheckoutNotPaid {
        session_id: String,
        payment_status: String,
    },

    /// The checkout session carries no plan metadata. Treated as a
    /// corrupted or foreign session rather than guessed at.
    #[error("Checkout session '{session_id}' carries no plan metadata")]
    CheckoutMetadataMissing { session_id: String },

    /// The checkout session was created for a different user.
    #[error("Checkout session '{session_id}' belongs to a different user")]
    CheckoutSessionMismatch { session_id: String },

    // Configuration errors
    /// No zero-price plan exists to move canceled users onto.
    #[error("No zero-price plan is configured as the cancellation fallback")]
    MissingFreePlan,

    /// More than one zero-price plan exists; the fallback is ambiguous.
    #[error("Expected exactly one zero-price plan, found {count}")]
    MultipleFreePlans { count: usize },

    // Remote provider errors
    /// The billing provider failed or rejected a request.
    #[error("Provider error during '{operation}': {message}")]
    Provider {
        operation: String,
        message: String,
        http_status: Option<u16>,
        retryable: bool,
    },

    /// An unexpected internal error.
    #[error("Internal billing error: {message}")]
    Internal { message: String },
}

impl BillingError {
    /// Build a non-retryable provider error without an HTTP status.
    pub fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
            http_status: None,
            retryable: false,
        }
    }

    /// Build a provider error from an HTTP status code. Rate limits (429)
    /// and server errors (5xx) are marked retryable.
    pub fn provider_http(
        operation: impl Into<String>,
        message: impl Into<String>,
        status: u16,
    ) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: message.into(),
            http_status: Some(status),
            retryable: status == 429 || (500..600).contains(&status),
        }
    }

    /// Build a retryable provider timeout error.
    pub fn provider_timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Provider {
            operation: operation.into(),
            message: format!("request timed out after {timeout_seconds} seconds"),
            http_status: Some(408),
            retryable: true,
        }
    }

    /// Build an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error was caused by the caller (bad input, failed
    /// precondition, stale reference) rather than by this system or the
    /// provider.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidPlan { .. }
            | Self::InvalidRedirectUrl { .. }
            | Self::PlanNotFound { .. }
            | Self::NoSubscription { .. }
            | Self::PlanNotConfigured { .. }
            | Self::PlanNotSyncable { .. }
            | Self::AlreadySubscribed { .. }
            | Self::PaymentMethodRequired { .. }
            | Self::TrialNotEligible { .. }
            | Self::CheckoutNotPaid { .. }
            | Self::CheckoutMetadataMissing { .. }
            | Self::CheckoutSessionMismatch { .. } => true,
            Self::Provider { http_status, .. } => {
                matches!(http_status, Some(400..=499))
            }
            _ => false,
        }
    }

    /// Check if retrying the operation could succeed. The core never
    /// retries on its own; this informs callers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}
