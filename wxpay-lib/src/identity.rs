//! Merchant identity: who signs outbound requests.
//!
//! A [`MerchantIdentity`] is built once per client and never mutated. The
//! private key and the APIv3 key never leave this type in serialized form, and
//! `Debug` output redacts both.

use std::fmt;
use std::path::Path;

use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, AEAD_KEY_SIZE};
use crate::{Result, WxPayError};

/// The 32-byte symmetric key used to decrypt certificates and webhooks.
///
/// Cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiV3Key([u8; AEAD_KEY_SIZE]);

impl ApiV3Key {
    /// Create a key from its textual form as issued by the merchant platform.
    ///
    /// The key is used as raw UTF-8 bytes and must be exactly 32 bytes long.
    pub fn new(key: impl AsRef<str>) -> Result<Self> {
        Self::from_bytes(key.as_ref().as_bytes())
    }

    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; AEAD_KEY_SIZE] = bytes.try_into().map_err(|_| {
            WxPayError::InvalidCredentials(format!(
                "APIv3 key must be {} bytes, got {}",
                AEAD_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ApiV3Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiV3Key(<redacted>)")
    }
}

/// Merchant credentials used to authenticate every outbound call.
pub struct MerchantIdentity {
    mchid: String,
    certificate_serial_no: String,
    private_key: RsaPrivateKey,
    api_v3_key: ApiV3Key,
}

impl MerchantIdentity {
    /// Create an identity from an already-known certificate serial number.
    pub fn new(
        mchid: impl Into<String>,
        certificate_serial_no: impl Into<String>,
        private_key: RsaPrivateKey,
        api_v3_key: ApiV3Key,
    ) -> Result<Self> {
        let mchid = mchid.into();
        let certificate_serial_no = certificate_serial_no.into();

        if mchid.is_empty() {
            return Err(WxPayError::InvalidCredentials(
                "merchant id cannot be empty".into(),
            ));
        }
        if certificate_serial_no.is_empty() {
            return Err(WxPayError::InvalidCredentials(
                "certificate serial number cannot be empty".into(),
            ));
        }

        Ok(Self {
            mchid,
            certificate_serial_no,
            private_key,
            api_v3_key,
        })
    }

    /// Create an identity from the merchant API certificate and private key PEMs.
    ///
    /// The serial number is read from the certificate, and the private key must
    /// match the certificate's public key.
    pub fn from_pem(
        mchid: impl Into<String>,
        certificate_pem: &str,
        private_key_pem: &str,
        api_v3_key: impl AsRef<str>,
    ) -> Result<Self> {
        let private_key = crypto::parse_private_key_pem(private_key_pem)?;
        let certificate = crypto::parse_certificate_pem(certificate_pem).map_err(|e| {
            WxPayError::InvalidCredentials(format!("unreadable merchant certificate: {}", e))
        })?;

        if certificate.public_key != private_key.to_public_key() {
            return Err(WxPayError::InvalidCredentials(format!(
                "private key does not match merchant certificate {}",
                certificate.serial_no
            )));
        }

        Self::new(
            mchid,
            certificate.serial_no,
            private_key,
            ApiV3Key::new(api_v3_key)?,
        )
    }

    /// Load the certificate and private key PEMs from disk.
    pub fn from_files(
        mchid: impl Into<String>,
        certificate_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
        api_v3_key: impl AsRef<str>,
    ) -> Result<Self> {
        let certificate_pem = read_pem(certificate_path.as_ref())?;
        let private_key_pem = read_pem(private_key_path.as_ref())?;
        Self::from_pem(mchid, &certificate_pem, &private_key_pem, api_v3_key)
    }

    /// Merchant id (`mchid`).
    pub fn mchid(&self) -> &str {
        &self.mchid
    }

    /// Serial number of the merchant API certificate.
    pub fn certificate_serial_no(&self) -> &str {
        &self.certificate_serial_no
    }

    /// Public half of the merchant key.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private_key.to_public_key()
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Symmetric key for certificate and webhook decryption.
    pub fn api_v3_key(&self) -> &ApiV3Key {
        &self.api_v3_key
    }

    /// Sign arbitrary bytes with the merchant key (RSA-SHA256, base64).
    pub fn sign(&self, data: &[u8]) -> Result<String> {
        crypto::sign_sha256_rsa(&self.private_key, data)
    }

    /// Decrypt a sensitive field the remote service encrypted to the merchant key.
    pub fn decrypt_sensitive(&self, ciphertext_b64: &str) -> Result<String> {
        let plaintext = crypto::rsa_oaep_decrypt(&self.private_key, ciphertext_b64)?;
        String::from_utf8(plaintext)
            .map_err(|_| WxPayError::malformed("decrypted field is not UTF-8"))
    }
}

impl fmt::Debug for MerchantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerchantIdentity")
            .field("mchid", &self.mchid)
            .field("certificate_serial_no", &self.certificate_serial_no)
            .field("private_key", &"<redacted>")
            .field("api_v3_key", &self.api_v3_key)
            .finish()
    }
}

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        WxPayError::InvalidCredentials(format!("cannot read {}: {}", path.display(), e))
    })
}
