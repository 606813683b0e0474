//! Response and webhook signature verification.
//!
//! The platform signs `TIMESTAMP\nNONCE\nBODY\n` with the key of the
//! certificate named in `Wechatpay-Serial`. `BODY` is empty when the body is
//! empty or an empty JSON object, otherwise the exact bytes received.

use std::sync::Arc;

use reqwest::header::HeaderMap;

use crate::certificates::CertificateStore;
use crate::crypto;
use crate::{Result, WxPayError};

pub const HEADER_TIMESTAMP: &str = "Wechatpay-Timestamp";
pub const HEADER_NONCE: &str = "Wechatpay-Nonce";
pub const HEADER_SIGNATURE: &str = "Wechatpay-Signature";
pub const HEADER_SERIAL: &str = "Wechatpay-Serial";

/// `TIMESTAMP\nNONCE\nBODY\n`
pub fn build_verification_string(timestamp: &str, nonce: &str, body: &str) -> String {
    format!("{}\n{}\n{}\n", timestamp, nonce, canonical_body(body))
}

/// The body as it enters the verification string.
///
/// Empty bodies and JSON objects with no keys sign as the empty string.
pub fn canonical_body(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "";
    }
    let empty_object = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .is_some_and(|inner| inner.trim().is_empty());
    if empty_object {
        return "";
    }
    body
}

/// The four signature headers of a response or webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub serial_no: String,
}

impl SignatureHeaders {
    /// Collect from name/value pairs, matching names case-insensitively.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut timestamp = None;
        let mut nonce = None;
        let mut signature = None;
        let mut serial_no = None;

        for (name, value) in pairs {
            let slot = if name.eq_ignore_ascii_case(HEADER_TIMESTAMP) {
                &mut timestamp
            } else if name.eq_ignore_ascii_case(HEADER_NONCE) {
                &mut nonce
            } else if name.eq_ignore_ascii_case(HEADER_SIGNATURE) {
                &mut signature
            } else if name.eq_ignore_ascii_case(HEADER_SERIAL) {
                &mut serial_no
            } else {
                continue;
            };
            *slot = Some(value.trim().to_string());
        }

        Ok(Self {
            timestamp: require(timestamp, HEADER_TIMESTAMP)?,
            nonce: require(nonce, HEADER_NONCE)?,
            signature: require(signature, HEADER_SIGNATURE)?,
            serial_no: require(serial_no, HEADER_SERIAL)?,
        })
    }

    /// Collect from an HTTP header map.
    pub fn from_header_map(headers: &HeaderMap) -> Result<Self> {
        Self::from_pairs(
            headers
                .iter()
                .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?))),
        )
    }
}

fn require(value: Option<String>, header: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(WxPayError::malformed(format!("missing {} header", header))),
    }
}

/// Checks platform signatures against the trust store.
#[derive(Clone, Debug)]
pub struct ResponseVerifier {
    store: Arc<CertificateStore>,
}

impl ResponseVerifier {
    /// Verifier reading certificates from `store`.
    pub fn new(store: Arc<CertificateStore>) -> Self {
        Self { store }
    }

    /// Verify a signature made by the certificate `serial_no`.
    ///
    /// Returns `Ok(false)` on a signature mismatch.
    ///
    /// # Errors
    ///
    /// [`WxPayError::UntrustedCertificate`] if `serial_no` is not in the store.
    pub fn verify(
        &self,
        serial_no: &str,
        timestamp: &str,
        nonce: &str,
        body: &str,
        signature: &str,
    ) -> Result<bool> {
        let certificate = self.store.get(serial_no)?;
        let message = build_verification_string(timestamp, nonce, body);
        Ok(crypto::verify_sha256_rsa(
            certificate.public_key(),
            message.as_bytes(),
            signature,
        ))
    }

    /// Verify and turn a mismatch into [`WxPayError::VerificationFailed`].
    pub fn verify_headers(&self, headers: &SignatureHeaders, body: &str) -> Result<()> {
        let valid = self.verify(
            &headers.serial_no,
            &headers.timestamp,
            &headers.nonce,
            body,
            &headers.signature,
        )?;
        if valid {
            Ok(())
        } else {
            Err(WxPayError::VerificationFailed(format!(
                "signature does not match certificate {}",
                headers.serial_no
            )))
        }
    }
}
