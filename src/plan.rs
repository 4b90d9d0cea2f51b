//! Plan entities and input validation.
//!
//! A [`Plan`] is a purchasable subscription tier. Paid plans are mirrored
//! to the billing provider as a product plus a price; the stored
//! `product_ref`/`price_ref` are the only link between the local row and
//! the provider's representation. Free plans never get a remote
//! representation.

use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Maximum length for plan names.
const MAX_NAME_LENGTH: usize = 128;

/// Maximum length for plan descriptions.
const MAX_DESCRIPTION_LENGTH: usize = 512;

/// Maximum trial length in days.
const MAX_TRIAL_DAYS: u32 = 365;

/// `max_users` value meaning "unlimited".
pub const UNLIMITED_USERS: i32 = -1;

/// Billing interval for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    /// Billed monthly.
    Monthly,
    /// Billed yearly.
    Yearly,
}

impl BillingPeriod {
    /// Parse from a period string. Returns `None` for unknown values so
    /// callers can reject them rather than defaulting.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" | "month" => Some(Self::Monthly),
            "yearly" | "year" | "annual" => Some(Self::Yearly),
            _ => None,
        }
    }

    /// Convert to the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// The provider's recurring-interval name for this period.
    #[must_use]
    pub fn as_interval(&self) -> &'static str {
        match self {
            Self::Monthly => "month",
            Self::Yearly => "year",
        }
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A purchasable subscription tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Opaque plan identifier.
    pub id: String,
    /// Display name shown to users.
    pub name: String,
    /// Description of the plan.
    pub description: String,
    /// Price in cents. 0 means free.
    pub price_cents: i64,
    /// Billing interval.
    pub period: BillingPeriod,
    /// Marketing feature list, in display order.
    pub features: Vec<String>,
    /// Maximum team size; [`UNLIMITED_USERS`] means unlimited.
    pub max_users: i32,
    /// Storage quota label (e.g. "10 GB").
    pub storage_label: String,
    /// Support tier label (e.g. "priority").
    pub support_label: String,
    /// Highlighted in pricing pages.
    pub is_popular: bool,
    /// Available for new purchases.
    pub is_active: bool,
    /// Hidden from new purchases but preserved for existing subscribers.
    pub is_archived: bool,
    /// Whether the plan structurally offers a trial.
    pub has_trial: bool,
    /// Trial length in days; 0 when the trial is disabled.
    pub trial_days: u32,
    /// Whether the trial is currently offered.
    pub trial_enabled: bool,
    /// Provider product reference, set after the first sync.
    pub product_ref: Option<String>,
    /// Provider price reference, set after the first sync.
    pub price_ref: Option<String>,
    /// Created timestamp (Unix seconds).
    pub created_at: u64,
    /// Updated timestamp (Unix seconds).
    pub updated_at: u64,
}

impl Plan {
    /// Check if this is a free plan. Free plans never need a remote
    /// representation.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    /// Check if this is a paid plan, eligible for provider sync.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.price_cents > 0
    }

    /// Check if the plan has been synced to the provider.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.product_ref.is_some() && self.price_ref.is_some()
    }

    /// Check if the trial is currently offered on this plan.
    #[must_use]
    pub fn offers_trial(&self) -> bool {
        self.has_trial && self.trial_enabled && self.trial_days > 0
    }

    /// Get the price formatted for display (e.g. "$15.00").
    #[must_use]
    pub fn formatted_price(&self) -> String {
        format!("${:.2}", self.price_cents as f64 / 100.0)
    }
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Price in cents. 0 means free.
    pub price_cents: i64,
    /// Billing interval.
    pub period: BillingPeriod,
    /// Marketing feature list, in display order.
    pub features: Vec<String>,
    /// Maximum team size; [`UNLIMITED_USERS`] means unlimited.
    pub max_users: i32,
    /// Storage quota label.
    pub storage_label: String,
    /// Support tier label.
    pub support_label: String,
    /// Highlighted in pricing pages.
    pub is_popular: bool,
    /// Whether the plan offers a trial.
    pub has_trial: bool,
    /// Trial length in days.
    pub trial_days: u32,
    /// Whether the trial is currently offered.
    pub trial_enabled: bool,
}

impl PlanDraft {
    /// Create a draft with the required fields; everything else defaults.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        price_cents: i64,
        period: BillingPeriod,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            price_cents,
            period,
            features: Vec::new(),
            max_users: UNLIMITED_USERS,
            storage_label: String::new(),
            support_label: String::new(),
            is_popular: false,
            has_trial: false,
            trial_days: 0,
            trial_enabled: false,
        }
    }

    /// Set the feature list.
    #[must_use]
    pub fn features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Set the maximum team size.
    #[must_use]
    pub fn max_users(mut self, max: i32) -> Self {
        self.max_users = max;
        self
    }

    /// Set the storage quota label.
    #[must_use]
    pub fn storage_label(mut self, label: impl Into<String>) -> Self {
        self.storage_label = label.into();
        self
    }

    /// Set the support tier label.
    #[must_use]
    pub fn support_label(mut self, label: impl Into<String>) -> Self {
        self.support_label = label.into();
        self
    }

    /// Mark the plan as popular.
    #[must_use]
    pub fn popular(mut self, popular: bool) -> Self {
        self.is_popular = popular;
        self
    }

    /// Enable a trial of the given length.
    #[must_use]
    pub fn trial(mut self, days: u32) -> Self {
        self.has_trial = true;
        self.trial_days = days;
        self.trial_enabled = true;
        self
    }

    /// Validate the draft. Rejected before any I/O.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_description(&self.description)?;
        if self.price_cents < 0 {
            return Err(BillingError::InvalidPlan {
                reason: format!("price must be non-negative, got {}", self.price_cents),
            });
        }
        if self.features.is_empty() {
            return Err(BillingError::InvalidPlan {
                reason: "feature list cannot be empty".to_string(),
            });
        }
        if self.max_users < UNLIMITED_USERS || self.max_users == 0 {
            return Err(BillingError::InvalidPlan {
                reason: format!(
                    "max_users must be positive or {UNLIMITED_USERS} (unlimited), got {}",
                    self.max_users
                ),
            });
        }
        if self.storage_label.trim().is_empty() {
            return Err(BillingError::InvalidPlan {
                reason: "storage label cannot be empty".to_string(),
            });
        }
        if self.support_label.trim().is_empty() {
            return Err(BillingError::InvalidPlan {
                reason: "support label cannot be empty".to_string(),
            });
        }
        if self.has_trial {
            if self.trial_days == 0 || self.trial_days > MAX_TRIAL_DAYS {
                return Err(BillingError::InvalidPlan {
                    reason: format!(
                        "trial_days must be between 1 and {MAX_TRIAL_DAYS}, got {}",
                        self.trial_days
                    ),
                });
            }
        }
        Ok(())
    }

    /// Build a [`Plan`] from a validated draft.
    ///
    /// A disabled trial forces `trial_days = 0` and `trial_enabled = false`
    /// regardless of what the draft carried.
    #[must_use]
    pub fn into_plan(self, id: String, now: u64) -> Plan {
        let (trial_days, trial_enabled) = if self.has_trial {
            (self.trial_days, self.trial_enabled)
        } else {
            (0, false)
        };
        Plan {
            id,
            name: self.name,
            description: self.description,
            price_cents: self.price_cents,
            period: self.period,
            features: self.features,
            max_users: self.max_users,
            storage_label: self.storage_label,
            support_label: self.support_label,
            is_popular: self.is_popular,
            is_active: true,
            is_archived: false,
            has_trial: self.has_trial,
            trial_days,
            trial_enabled,
            product_ref: None,
            price_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for a plan. Only provided fields are applied.
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New price in cents.
    pub price_cents: Option<i64>,
    /// New billing interval.
    pub period: Option<BillingPeriod>,
    /// New feature list.
    pub features: Option<Vec<String>>,
    /// New maximum team size.
    pub max_users: Option<i32>,
    /// New storage quota label.
    pub storage_label: Option<String>,
    /// New support tier label.
    pub support_label: Option<String>,
    /// New popular flag.
    pub is_popular: Option<bool>,
    /// New trial flag.
    pub has_trial: Option<bool>,
    /// New trial length in days.
    pub trial_days: Option<u32>,
    /// New trial-offered flag.
    pub trial_enabled: Option<bool>,
}

impl PlanUpdate {
    /// Create an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a new name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a new description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set a new price.
    #[must_use]
    pub fn price_cents(mut self, cents: i64) -> Self {
        self.price_cents = Some(cents);
        self
    }

    /// Set a new billing interval.
    #[must_use]
    pub fn period(mut self, period: BillingPeriod) -> Self {
        self.period = Some(period);
        self
    }

    /// Set a new feature list.
    #[must_use]
    pub fn features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = Some(features.into_iter().map(Into::into).collect());
        self
    }

    /// Set a new maximum team size.
    #[must_use]
    pub fn max_users(mut self, max: i32) -> Self {
        self.max_users = Some(max);
        self
    }

    /// Set a new storage quota label.
    #[must_use]
    pub fn storage_label(mut self, label: impl Into<String>) -> Self {
        self.storage_label = Some(label.into());
        self
    }

    /// Set a new support tier label.
    #[must_use]
    pub fn support_label(mut self, label: impl Into<String>) -> Self {
        self.support_label = Some(label.into());
        self
    }

    /// Set the popular flag.
    #[must_use]
    pub fn popular(mut self, popular: bool) -> Self {
        self.is_popular = Some(popular);
        self
    }

    /// Set the trial flag.
    #[must_use]
    pub fn has_trial(mut self, has_trial: bool) -> Self {
        self.has_trial = Some(has_trial);
        self
    }

    /// Set the trial length.
    #[must_use]
    pub fn trial_days(mut self, days: u32) -> Self {
        self.trial_days = Some(days);
        self
    }

    /// Set the trial-offered flag.
    #[must_use]
    pub fn trial_enabled(mut self, enabled: bool) -> Self {
        self.trial_enabled = Some(enabled);
        self
    }

    /// Check whether either trial field is present in the payload.
    #[must_use]
    pub fn touches_trial(&self) -> bool {
        self.has_trial.is_some() || self.trial_days.is_some()
    }

    /// Validate the provided fields. Rejected before any I/O.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref name) = self.name {
            validate_name(name)?;
        }
        if let Some(ref description) = self.description {
            validate_description(description)?;
        }
        if let Some(cents) = self.price_cents {
            if cents < 0 {
                return Err(BillingError::InvalidPlan {
                    reason: format!("price must be non-negative, got {cents}"),
                });
            }
        }
        if let Some(ref features) = self.features {
            if features.is_empty() {
                return Err(BillingError::InvalidPlan {
                    reason: "feature list cannot be empty".to_string(),
                });
            }
        }
        if let Some(max) = self.max_users {
            if max < UNLIMITED_USERS || max == 0 {
                return Err(BillingError::InvalidPlan {
                    reason: format!(
                        "max_users must be positive or {UNLIMITED_USERS} (unlimited), got {max}"
                    ),
                });
            }
        }
        if let Some(days) = self.trial_days {
            if days > MAX_TRIAL_DAYS {
                return Err(BillingError::InvalidPlan {
                    reason: format!("trial_days must be at most {MAX_TRIAL_DAYS}, got {days}"),
                });
            }
        }
        Ok(())
    }

    /// Apply the provided fields to a plan, enforcing the trial invariant:
    /// `has_trial = false` forces `trial_days = 0` and `trial_enabled = false`.
    pub fn apply_to(&self, plan: &mut Plan) {
        if let Some(ref name) = self.name {
            plan.name = name.clone();
        }
        if let Some(ref description) = self.description {
            plan.description = description.clone();
        }
        if let Some(cents) = self.price_cents {
            plan.price_cents = cents;
        }
        if let Some(period) = self.period {
            plan.period = period;
        }
        if let Some(ref features) = self.features {
            plan.features = features.clone();
        }
        if let Some(max) = self.max_users {
            plan.max_users = max;
        }
        if let Some(ref label) = self.storage_label {
            plan.storage_label = label.clone();
        }
        if let Some(ref label) = self.support_label {
            plan.support_label = label.clone();
        }
        if let Some(popular) = self.is_popular {
            plan.is_popular = popular;
        }
        if let Some(has_trial) = self.has_trial {
            plan.has_trial = has_trial;
        }
        if let Some(days) = self.trial_days {
            plan.trial_days = days;
        }
        if let Some(enabled) = self.trial_enabled {
            plan.trial_enabled = enabled;
        }
        if !plan.has_trial {
            plan.trial_days = 0;
            plan.trial_enabled = false;
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(BillingError::InvalidPlan {
            reason: "name cannot be empty".to_string(),
        });
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(BillingError::InvalidPlan {
            reason: format!("name exceeds maximum length of {MAX_NAME_LENGTH}"),
        });
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(BillingError::InvalidPlan {
            reason: "description cannot be empty".to_string(),
        });
    }
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(BillingError::InvalidPlan {
            reason: format!("description exceeds maximum length of {MAX_DESCRIPTION_LENGTH}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PlanDraft {
        PlanDraft::new("Pro", "For growing teams", 1500, BillingPeriod::Monthly)
            .features(["projects", "reports"])
            .max_users(10)
            .storage_label("50 GB")
            .support_label("priority")
    }

    #[test]
    fn draft_validates() {
        assert!(draft().validate().is_ok());

        let mut d = draft();
        d.price_cents = -1;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.features.clear();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.max_users = 0;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.max_users = UNLIMITED_USERS;
        assert!(d.validate().is_ok());

        let mut d = draft();
        d.has_trial = true;
        d.trial_days = 0;
        assert!(d.validate().is_err());
    }

    #[test]
    fn into_plan_applies_defaults() {
        let plan = draft().into_plan("plan_1".to_string(), 1000);
        assert!(plan.is_active);
        assert!(!plan.is_archived);
        assert!(!plan.is_popular);
        assert!(plan.is_paid());
        assert!(!plan.is_synced());
        assert_eq!(plan.created_at, 1000);
    }

    #[test]
    fn disabled_trial_forces_zero_days() {
        let mut d = draft();
        d.has_trial = false;
        d.trial_days = 14;
        d.trial_enabled = true;
        let plan = d.into_plan("plan_1".to_string(), 0);
        assert_eq!(plan.trial_days, 0);
        assert!(!plan.trial_enabled);
        assert!(!plan.offers_trial());
    }

    #[test]
    fn update_applies_only_provided_fields() {
        let mut plan = draft().trial(14).into_plan("plan_1".to_string(), 0);
        let update = PlanUpdate::new().name("Pro v2").price_cents(2000);
        update.apply_to(&mut plan);

        assert_eq!(plan.name, "Pro v2");
        assert_eq!(plan.price_cents, 2000);
        assert_eq!(plan.description, "For growing teams");
        assert_eq!(plan.trial_days, 14);
    }

    #[test]
    fn update_disabling_trial_clears_trial_fields() {
        let mut plan = draft().trial(14).into_plan("plan_1".to_string(), 0);
        PlanUpdate::new().has_trial(false).apply_to(&mut plan);

        assert!(!plan.has_trial);
        assert_eq!(plan.trial_days, 0);
        assert!(!plan.trial_enabled);
    }

    #[test]
    fn billing_period_parse_rejects_unknown() {
        assert_eq!(BillingPeriod::parse("monthly"), Some(BillingPeriod::Monthly));
        assert_eq!(BillingPeriod::parse("annual"), Some(BillingPeriod::Yearly));
        assert_eq!(BillingPeriod::parse("weekly"), None);
    }

    #[test]
    fn formatted_price() {
        let plan = draft().into_plan("plan_1".to_string(), 0);
        assert_eq!(plan.formatted_price(), "$15.00");
    }
}
