//! Platform certificate trust store.
//!
//! The store holds an immutable [`TrustSnapshot`] behind an `Arc`. Readers
//! clone the `Arc` and work on a consistent view; a refresh builds a complete
//! new snapshot and swaps it in. A snapshot is never modified after it is
//! published.
//!
//! # Staleness
//!
//! The store is stale when `now >= next_refresh_at` or when it has never been
//! refreshed. [`CertificateStore::ensure_fresh`] is a no-op on a fresh store
//! unless forced. A successful refresh sets `next_refresh_at` to now plus the
//! refresh interval (12 hours by default), which is deliberately shorter than
//! the certificates' own rotation period.
//!
//! A failed refresh keeps the previous snapshot and leaves `next_refresh_at`
//! untouched, so the next caller retries immediately.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{self, EncryptedResource};
use crate::crypto;
use crate::identity::ApiV3Key;
use crate::{Result, WxPayError};

/// One entry of the certificate listing endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CertificateEntry {
    /// Certificate serial number.
    pub serial_no: String,
    /// Start of validity, RFC 3339.
    pub effective_time: String,
    /// End of validity, RFC 3339.
    pub expire_time: String,
    /// The PEM certificate sealed with the APIv3 key.
    pub encrypt_certificate: EncryptedResource,
}

/// Body of `GET /v3/certificates`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CertificateListing {
    /// Certificates currently issued to the merchant.
    #[serde(default)]
    pub data: Vec<CertificateEntry>,
}

/// Where refreshed certificate listings come from.
///
/// Implemented by [`crate::transport::HttpTransport`]; tests substitute an
/// in-memory source.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// Fetch the current certificate listing.
    async fn fetch_certificates(&self) -> Result<CertificateListing>;
}

/// Time source for staleness decisions.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A decrypted, parsed platform certificate.
#[derive(Clone, Debug)]
pub struct TrustedCertificate {
    serial_no: String,
    effective_time: DateTime<Utc>,
    expire_time: DateTime<Utc>,
    certificate_pem: String,
    public_key: RsaPublicKey,
}

impl TrustedCertificate {
    /// Build a trusted certificate from its PEM and validity window.
    ///
    /// The serial number and public key are read from the certificate.
    pub fn from_pem(
        certificate_pem: impl Into<String>,
        effective_time: DateTime<Utc>,
        expire_time: DateTime<Utc>,
    ) -> Result<Self> {
        let certificate_pem = certificate_pem.into();
        if expire_time <= effective_time {
            return Err(WxPayError::malformed(format!(
                "certificate expires ({}) before it takes effect ({})",
                expire_time, effective_time
            )));
        }

        let info = crypto::parse_certificate_pem(&certificate_pem)?;
        Ok(Self {
            serial_no: info.serial_no,
            effective_time,
            expire_time,
            certificate_pem,
            public_key: info.public_key,
        })
    }

    /// Decrypt and parse one listing entry.
    pub fn from_entry(entry: &CertificateEntry, api_v3_key: &ApiV3Key) -> Result<Self> {
        let pem = codec::decrypt_resource(&entry.encrypt_certificate, api_v3_key)?;
        let certificate = Self::from_pem(
            pem,
            parse_time("effective_time", &entry.effective_time)?,
            parse_time("expire_time", &entry.expire_time)?,
        )?;

        if !certificate.serial_no.eq_ignore_ascii_case(&entry.serial_no) {
            return Err(WxPayError::malformed(format!(
                "listing serial {} does not match certificate serial {}",
                entry.serial_no, certificate.serial_no
            )));
        }
        Ok(certificate)
    }

    /// Serial number, uppercase hex.
    pub fn serial_no(&self) -> &str {
        &self.serial_no
    }

    /// Start of validity.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.effective_time
    }

    /// End of validity.
    pub fn expire_time(&self) -> DateTime<Utc> {
        self.expire_time
    }

    /// The certificate as received, PEM encoded.
    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// Public key used to verify signatures and encrypt sensitive fields.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WxPayError::malformed(format!("invalid {} {:?}: {}", field, value, e)))
}

/// An immutable view of the trusted certificates.
#[derive(Clone, Debug, Default)]
pub struct TrustSnapshot {
    certificates: Vec<TrustedCertificate>,
    next_refresh_at: Option<DateTime<Utc>>,
}

impl TrustSnapshot {
    fn new(mut certificates: Vec<TrustedCertificate>, next_refresh_at: DateTime<Utc>) -> Self {
        // Stable: equal expiry keeps listing order.
        certificates.sort_by(|a, b| b.expire_time.cmp(&a.expire_time));
        Self {
            certificates,
            next_refresh_at: Some(next_refresh_at),
        }
    }

    /// Certificates ordered by expiry, furthest first.
    pub fn certificates(&self) -> &[TrustedCertificate] {
        &self.certificates
    }

    /// When this snapshot goes stale. `None` if never refreshed.
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.next_refresh_at
    }

    /// Whether the snapshot holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Look up a certificate by serial number (case-insensitive).
    pub fn get(&self, serial_no: &str) -> Result<&TrustedCertificate> {
        self.certificates
            .iter()
            .find(|c| c.serial_no.eq_ignore_ascii_case(serial_no))
            .ok_or_else(|| WxPayError::untrusted(serial_no))
    }

    /// The certificate with the furthest expiry.
    pub fn current(&self) -> Result<&TrustedCertificate> {
        self.certificates
            .first()
            .ok_or(WxPayError::NoTrustedCertificates)
    }

    fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        match self.next_refresh_at {
            Some(at) => now >= at,
            None => true,
        }
    }
}

/// Shared store of trusted platform certificates.
pub struct CertificateStore {
    api_v3_key: ApiV3Key,
    refresh_interval: Duration,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<TrustSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl CertificateStore {
    /// Create an empty store.
    pub fn new(api_v3_key: ApiV3Key, refresh_interval: std::time::Duration) -> Self {
        Self {
            api_v3_key,
            refresh_interval: Duration::from_std(refresh_interval)
                .unwrap_or_else(|_| Duration::hours(12)),
            clock: Arc::new(SystemClock),
            snapshot: RwLock::new(Arc::new(TrustSnapshot::default())),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<TrustSnapshot> {
        // Writers only swap the Arc, so a poisoned lock still holds a whole snapshot.
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a certificate by serial number.
    ///
    /// Returns [`WxPayError::UntrustedCertificate`] if it is not in the store.
    pub fn get(&self, serial_no: &str) -> Result<TrustedCertificate> {
        self.snapshot().get(serial_no).cloned()
    }

    /// The default encryption target: the certificate with the furthest expiry.
    pub fn current(&self) -> Result<TrustedCertificate> {
        self.snapshot().current().cloned()
    }

    /// When the store goes stale.
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot().next_refresh_at()
    }

    /// Whether the next [`ensure_fresh`](Self::ensure_fresh) would hit the network.
    pub fn is_stale(&self) -> bool {
        self.snapshot().is_stale_at(self.clock.now())
    }

    /// Replace the store with the given certificates.
    ///
    /// Used by [`ensure_fresh`](Self::ensure_fresh), and by callers that pin
    /// certificates obtained out of band.
    pub fn install(&self, certificates: Vec<TrustedCertificate>) {
        let next_refresh_at = self.clock.now() + self.refresh_interval;
        let snapshot = Arc::new(TrustSnapshot::new(certificates, next_refresh_at));
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    /// Decrypt a listing and install it.
    ///
    /// All entries must decrypt and parse, otherwise the store is left as it was.
    /// Returns the number of installed certificates.
    pub fn install_listing(&self, listing: &CertificateListing) -> Result<usize> {
        if listing.data.is_empty() {
            return Err(WxPayError::malformed("certificate listing is empty"));
        }

        let certificates = listing
            .data
            .iter()
            .map(|entry| TrustedCertificate::from_entry(entry, &self.api_v3_key))
            .collect::<Result<Vec<_>>>()?;

        let count = certificates.len();
        let serials: Vec<&str> = certificates.iter().map(|c| c.serial_no()).collect();
        info!(count, serials = ?serials, "platform certificates refreshed");

        self.install(certificates);
        Ok(count)
    }

    /// Refresh from `source` if stale or forced.
    ///
    /// Refreshes are serialized. A caller that waited for another task's refresh
    /// re-checks staleness and returns without a network call if the store is
    /// now fresh. Returns whether this call refreshed the store.
    ///
    /// # Errors
    ///
    /// Fetch and decryption failures are returned to the caller; the previous
    /// certificates stay in place.
    #[tracing::instrument(skip(self, source), level = "debug")]
    pub async fn ensure_fresh(&self, source: &dyn CertificateSource, force: bool) -> Result<bool> {
        if !force && !self.is_stale() {
            return Ok(false);
        }

        let _guard = self.refresh_lock.lock().await;
        if !force && !self.is_stale() {
            debug!("certificates refreshed by a concurrent caller");
            return Ok(false);
        }

        debug!("refreshing platform certificates");
        let result = match source.fetch_certificates().await {
            Ok(listing) => self.install_listing(&listing),
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!(error = %e, "certificate refresh failed, keeping previous certificates");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CertificateStore")
            .field("certificates", &snapshot.certificates.len())
            .field("next_refresh_at", &snapshot.next_refresh_at)
            .finish_non_exhaustive()
    }
}
