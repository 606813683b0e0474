//! Client configuration.
//!
//! # Environment Variables
//!
//! [`ClientConfig::from_env`] overrides the defaults with:
//! - `WXPAY_BASE_URL` - API origin (default `https://api.mch.weixin.qq.com`)
//! - `WXPAY_USER_AGENT` - `User-Agent` header value
//! - `WXPAY_TIMEOUT_SECS` - per-request timeout in seconds
//! - `WXPAY_AUTO_UPDATE_CERTIFICATES` - `true`/`false`
//! - `WXPAY_VERIFY_RESPONSES` - `true`/`false`

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, WxPayError};

/// Production API origin.
pub const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";

/// Configuration for [`crate::WxPayClient`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API origin, without a trailing path.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// `User-Agent` header sent on every call.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Length of the random nonce used when signing.
    #[serde(default = "default_nonce_len")]
    pub nonce_len: usize,

    /// How long a refreshed certificate set is trusted before the next refresh.
    ///
    /// This is a safety margin, shorter than the certificates' own rotation period.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Refresh platform certificates lazily before outbound calls.
    #[serde(default = "default_true")]
    pub auto_update_certificates: bool,

    /// Verify the platform signature on every successful response.
    #[serde(default = "default_true")]
    pub verify_responses: bool,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("wxpay-lib/{}", env!("CARGO_PKG_VERSION"))
}

fn default_timeout() -> u64 {
    300 // 5 minutes
}

fn default_nonce_len() -> usize {
    32
}

fn default_refresh_interval() -> u64 {
    12 * 60 * 60
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            nonce_len: default_nonce_len(),
            refresh_interval_secs: default_refresh_interval(),
            auto_update_certificates: true,
            verify_responses: true,
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at the given API origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `WXPAY_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("WXPAY_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(agent) = std::env::var("WXPAY_USER_AGENT") {
            config.user_agent = agent;
        }
        if let Ok(secs) = std::env::var("WXPAY_TIMEOUT_SECS") {
            config.timeout_secs = secs.parse().map_err(|_| {
                WxPayError::invalid_config("timeout_secs", format!("not a number: {secs}"))
            })?;
        }
        if let Ok(flag) = std::env::var("WXPAY_AUTO_UPDATE_CERTIFICATES") {
            config.auto_update_certificates = parse_flag("auto_update_certificates", &flag)?;
        }
        if let Ok(flag) = std::env::var("WXPAY_VERIFY_RESPONSES") {
            config.verify_responses = parse_flag("verify_responses", &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the `User-Agent` header value.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the nonce length.
    pub fn with_nonce_len(mut self, len: usize) -> Self {
        self.nonce_len = len;
        self
    }

    /// Set the certificate refresh interval.
    pub fn with_refresh_interval(mut self, secs: u64) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Enable or disable lazy certificate refresh.
    pub fn with_auto_update_certificates(mut self, enabled: bool) -> Self {
        self.auto_update_certificates = enabled;
        self
    }

    /// Enable or disable response signature verification.
    pub fn with_verify_responses(mut self, enabled: bool) -> Self {
        self.verify_responses = enabled;
        self
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(WxPayError::invalid_config("base_url", "cannot be empty"));
        }
        Url::parse(&self.base_url)
            .map_err(|e| WxPayError::invalid_config("base_url", e.to_string()))?;
        if self.timeout_secs == 0 {
            return Err(WxPayError::invalid_config("timeout_secs", "must be positive"));
        }
        if self.nonce_len == 0 {
            return Err(WxPayError::invalid_config("nonce_len", "must be positive"));
        }
        if self.refresh_interval_secs == 0 {
            return Err(WxPayError::invalid_config(
                "refresh_interval_secs",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Join an absolute API path onto the configured origin.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path_and_query)
    }
}

fn parse_flag(field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(WxPayError::invalid_config(field, format!("not a boolean: {other}"))),
    }
}
