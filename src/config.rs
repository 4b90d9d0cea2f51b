//! Billing configuration.

use url::Url;

use crate::error::{BillingError, Result};

/// Configuration for the subscription manager.
///
/// Redirect URLs are validated eagerly so a misconfigured deployment
/// fails at startup rather than at the first checkout.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    success_url: String,
    cancel_url: String,
    allowed_redirect_domains: Vec<String>,
    allow_insecure_redirects: bool,
}

impl BillingConfig {
    /// Create a configuration with the given post-checkout redirect URLs.
    pub fn new(success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        Self {
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
            allowed_redirect_domains: Vec::new(),
            allow_insecure_redirects: false,
        }
    }

    /// Restrict redirect URLs to the given domains (exact host match or
    /// subdomain). An empty list allows any host.
    #[must_use]
    pub fn allowed_redirect_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_redirect_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Allow plain-HTTP redirect URLs. Intended for local development
    /// only.
    #[must_use]
    pub fn allow_insecure_redirects(mut self) -> Self {
        self.allow_insecure_redirects = true;
        self
    }

    /// The URL the customer lands on after paying.
    #[must_use]
    pub fn success_url(&self) -> &str {
        &self.success_url
    }

    /// The URL the customer lands on after abandoning checkout.
    #[must_use]
    pub fn cancel_url(&self) -> &str {
        &self.cancel_url
    }

    /// Validate both configured redirect URLs. Called before any
    /// checkout session is created.
    pub fn validate(&self) -> Result<()> {
        self.validate_redirect_url(&self.success_url)?;
        self.validate_redirect_url(&self.cancel_url)
    }

    /// Validate a single redirect URL: must parse, must be HTTPS (unless
    /// insecure redirects are allowed), and must match the domain
    /// allow-list when one is configured.
    pub fn validate_redirect_url(&self, raw: &str) -> Result<()> {
        let invalid = |reason: &str| BillingError::InvalidRedirectUrl {
            url: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&format!("not a valid URL: {e}")))?;

        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure_redirects => {}
            scheme => return Err(invalid(&format!("scheme '{scheme}' is not allowed"))),
        }

        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;

        if !self.allowed_redirect_domains.is_empty() {
            let allowed = self.allowed_redirect_domains.iter().any(|domain| {
                host == domain || host.ends_with(&format!(".{domain}"))
            });
            if !allowed {
                return Err(invalid(&format!("host '{host}' is not in the allow-list")));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_urls_pass_by_default() {
        let config = BillingConfig::new(
            "https://app.example.com/billing/success",
            "https://app.example.com/billing/cancel",
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn http_rejected_unless_allowed() {
        let config = BillingConfig::new("http://localhost:3000/ok", "http://localhost:3000/no");
        assert!(config.validate().is_err());

        let config = BillingConfig::new("http://localhost:3000/ok", "http://localhost:3000/no")
            .allow_insecure_redirects();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn domain_allow_list_matches_subdomains() {
        let config = BillingConfig::new("https://x/", "https://x/")
            .allowed_redirect_domains(["example.com"]);

        assert!(config.validate_redirect_url("https://example.com/done").is_ok());
        assert!(config.validate_redirect_url("https://app.example.com/done").is_ok());
        assert!(config
            .validate_redirect_url("https://evilexample.com/done")
            .is_err());
        assert!(config
            .validate_redirect_url("https://example.com.evil.net/done")
            .is_err());
    }

    #[test]
    fn garbage_urls_are_rejected() {
        let config = BillingConfig::new("https://x/", "https://x/");
        assert!(config.validate_redirect_url("not a url").is_err());
        assert!(config.validate_redirect_url("javascript:alert(1)").is_err());
    }
}
