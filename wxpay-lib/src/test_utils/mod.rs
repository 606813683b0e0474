//! Test utilities for wxpay-lib.
//!
//! - PEM fixtures for a merchant and two platform certificates
//! - Builders for sealed certificate listings and platform-signed messages
//! - An in-memory [`CertificateSource`] and a manually advanced [`Clock`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wxpay_lib::test_utils::{certificate_entry, MockCertificateSource, TestFixtures};
//!
//! let source = MockCertificateSource::new(CertificateListing {
//!     data: vec![certificate_entry(
//!         TestFixtures::PLATFORM_A_CERT_PEM,
//!         "2026-01-01T00:00:00+08:00",
//!         "2031-01-01T00:00:00+08:00",
//!     )],
//! });
//! store.ensure_fresh(&source, false).await?;
//! ```

mod fixtures;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rsa::RsaPrivateKey;

use crate::certificates::{CertificateEntry, CertificateListing, CertificateSource, Clock};
use crate::codec::EncryptedResource;
use crate::{crypto, signer, verifier, Result, WxPayError};

pub use fixtures::{
    merchant_private_key, platform_a_private_key, platform_b_private_key, TestFixtures,
};

/// Build a listing entry for `certificate_pem`, sealed with the fixture APIv3 key.
pub fn certificate_entry(
    certificate_pem: &str,
    effective_time: &str,
    expire_time: &str,
) -> CertificateEntry {
    let info = crypto::parse_certificate_pem(certificate_pem).expect("fixture certificate parses");
    let encrypt_certificate = EncryptedResource::seal(
        &TestFixtures::api_v3_key(),
        &signer::generate_nonce(crypto::AEAD_NONCE_SIZE),
        "certificate",
        certificate_pem.as_bytes(),
    )
    .expect("fixture key seals");

    CertificateEntry {
        serial_no: info.serial_no,
        effective_time: effective_time.to_string(),
        expire_time: expire_time.to_string(),
        encrypt_certificate,
    }
}

/// A response or webhook signed with a platform key.
#[derive(Clone, Debug)]
pub struct SignedMessage {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub serial_no: String,
}

impl SignedMessage {
    /// The `Wechatpay-*` headers carrying this signature.
    pub fn headers(&self) -> Vec<(String, String)> {
        vec![
            (verifier::HEADER_TIMESTAMP.to_string(), self.timestamp.clone()),
            (verifier::HEADER_NONCE.to_string(), self.nonce.clone()),
            (verifier::HEADER_SIGNATURE.to_string(), self.signature.clone()),
            (verifier::HEADER_SERIAL.to_string(), self.serial_no.clone()),
        ]
    }
}

/// Sign `body` the way the platform signs responses and webhooks.
pub fn sign_as_platform(private_key: &RsaPrivateKey, serial_no: &str, body: &str) -> SignedMessage {
    let timestamp = signer::unix_timestamp();
    let nonce = signer::generate_nonce(32);
    let message = verifier::build_verification_string(&timestamp, &nonce, body);
    let signature =
        crypto::sign_sha256_rsa(private_key, message.as_bytes()).expect("fixture key signs");

    SignedMessage {
        timestamp,
        nonce,
        signature,
        serial_no: serial_no.to_string(),
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(
            Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0)
                .single()
                .expect("valid fixture time"),
        )
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// In-memory certificate source that counts fetches.
#[derive(Debug)]
pub struct MockCertificateSource {
    listing: Mutex<CertificateListing>,
    failing: AtomicBool,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockCertificateSource {
    /// Serve `listing` on every fetch.
    pub fn new(listing: CertificateListing) -> Self {
        Self {
            listing: Mutex::new(listing),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep before answering each fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve a different listing from now on.
    pub fn set_listing(&self, listing: CertificateListing) {
        *self.listing.lock().expect("listing lock") = listing;
    }

    /// Make fetches fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateSource for MockCertificateSource {
    async fn fetch_certificates(&self) -> Result<CertificateListing> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(WxPayError::ConnectionFailed {
                target: "mock".to_string(),
                reason: "refused".to_string(),
            });
        }
        Ok(self.listing.lock().expect("listing lock").clone())
    }
}
