//! Request signing.
//!
//! Every outbound call carries an `Authorization` header computed over a
//! canonical string:
//!
//! ```text
//! METHOD\n
//! PATH?QUERY\n
//! TIMESTAMP\n
//! NONCE\n
//! BODY\n
//! ```
//!
//! `BODY` is the exact byte sequence transmitted, or empty for requests
//! without a body. Signing a re-serialized body that differs from what goes
//! on the wire makes the remote side reject the call.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use url::Url;

use crate::identity::MerchantIdentity;
use crate::{Result, WxPayError};

/// Default nonce length.
pub const DEFAULT_NONCE_LEN: usize = 32;

/// Authentication scheme named in the `Authorization` header.
///
/// Only the RSA scheme is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    /// `WECHATPAY2-SHA256-RSA2048`
    #[default]
    Sha256Rsa2048,
}

impl AuthScheme {
    /// Wire name of the scheme.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256Rsa2048 => "WECHATPAY2-SHA256-RSA2048",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The values a single request is signed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningEnvelope {
    pub method: String,
    /// Absolute path plus query string, without scheme or host.
    pub canonical_path: String,
    pub timestamp: String,
    pub nonce: String,
    pub body: String,
}

impl SigningEnvelope {
    /// Envelope with a fresh timestamp and nonce.
    pub fn new(
        method: impl AsRef<str>,
        canonical_path: impl Into<String>,
        body: impl Into<String>,
        nonce_len: usize,
    ) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            canonical_path: canonical_path.into(),
            timestamp: unix_timestamp(),
            nonce: generate_nonce(nonce_len),
            body: body.into(),
        }
    }

    /// The canonical string for this envelope.
    pub fn canonical_string(&self) -> String {
        build_canonical_string(
            &self.method,
            &self.canonical_path,
            &self.timestamp,
            &self.nonce,
            &self.body,
        )
    }
}

/// `METHOD\nPATH\nTIMESTAMP\nNONCE\nBODY\n`
pub fn build_canonical_string(
    method: &str,
    path_and_query: &str,
    timestamp: &str,
    nonce: &str,
    body: &str,
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n",
        method, path_and_query, timestamp, nonce, body
    )
}

/// Random string over `[A-Za-z0-9]`, uniformly distributed.
pub fn generate_nonce(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Whole seconds since the Unix epoch, as a decimal string.
pub fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
        .to_string()
}

/// Path and query of `url`, the part that gets signed.
pub fn path_and_query(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| WxPayError::invalid_config("url", format!("{}: {}", url, e)))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

/// Produces `Authorization` header values for the merchant.
#[derive(Clone, Debug)]
pub struct RequestSigner {
    identity: Arc<MerchantIdentity>,
    scheme: AuthScheme,
    nonce_len: usize,
}

impl RequestSigner {
    /// Signer using the default scheme and nonce length.
    pub fn new(identity: Arc<MerchantIdentity>) -> Self {
        Self {
            identity,
            scheme: AuthScheme::default(),
            nonce_len: DEFAULT_NONCE_LEN,
        }
    }

    /// Set the nonce length.
    pub fn with_nonce_len(mut self, nonce_len: usize) -> Self {
        self.nonce_len = nonce_len;
        self
    }

    /// The merchant this signer signs for.
    pub fn identity(&self) -> &MerchantIdentity {
        &self.identity
    }

    /// Fresh envelope for a request.
    pub fn envelope(&self, method: &str, path_and_query: &str, body: &str) -> SigningEnvelope {
        SigningEnvelope::new(method, path_and_query, body, self.nonce_len)
    }

    /// Sign `envelope` and format the `Authorization` header value.
    pub fn sign(&self, envelope: &SigningEnvelope) -> Result<String> {
        let signature = self.identity.sign(envelope.canonical_string().as_bytes())?;
        Ok(format!(
            r#"{} mchid="{}",nonce_str="{}",signature="{}",serial_no="{}",timestamp="{}""#,
            self.scheme,
            self.identity.mchid(),
            envelope.nonce,
            signature,
            self.identity.certificate_serial_no(),
            envelope.timestamp,
        ))
    }

    /// Build a fresh envelope and sign it in one step.
    pub fn authorization(&self, method: &str, path_and_query: &str, body: &str) -> Result<String> {
        self.sign(&self.envelope(method, path_and_query, body))
    }
}

/// Parsed form of an `Authorization` header.
///
/// The remote side is the only consumer in production; this is kept for
/// diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationParts {
    pub scheme: String,
    pub mchid: String,
    pub nonce_str: String,
    pub signature: String,
    pub serial_no: String,
    pub timestamp: String,
}

impl AuthorizationParts {
    /// Parse `SCHEME k="v",k="v",...`.
    pub fn parse(header: &str) -> Result<Self> {
        let (scheme, params) = header
            .split_once(' ')
            .ok_or_else(|| WxPayError::malformed("authorization header has no scheme"))?;

        let mut parts = Self {
            scheme: scheme.to_string(),
            mchid: String::new(),
            nonce_str: String::new(),
            signature: String::new(),
            serial_no: String::new(),
            timestamp: String::new(),
        };

        for pair in params.split(',') {
            let (key, value) = pair
                .trim()
                .split_once('=')
                .ok_or_else(|| WxPayError::malformed(format!("bad parameter {:?}", pair)))?;
            let value = value.trim_matches('"').to_string();
            match key {
                "mchid" => parts.mchid = value,
                "nonce_str" => parts.nonce_str = value,
                "signature" => parts.signature = value,
                "serial_no" => parts.serial_no = value,
                "timestamp" => parts.timestamp = value,
                _ => {}
            }
        }
        Ok(parts)
    }
}
