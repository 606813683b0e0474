//! Cryptographic primitives used by the protocol.
//!
//! - **Signatures**: RSA PKCS#1 v1.5 over a SHA-256 digest, base64 encoded
//! - **AEAD**: AES-256-GCM, ciphertext carries the 16-byte tag at its end
//! - **Sensitive fields**: RSA-OAEP (SHA-1 digest and MGF1), base64 encoded
//!
//! All functions are pure and synchronous.
//!
//! # Wire Format (AEAD)
//!
//! ```text
//! base64( [N bytes ciphertext][16 bytes auth tag] )
//! ```

use aes_gcm::{
    aead::{consts, generic_array::GenericArray, Aead, KeyInit, Payload},
    aes::Aes256,
    Aes256Gcm, AesGcm,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{Result, WxPayError};

/// AES-256 key size in bytes.
pub const AEAD_KEY_SIZE: usize = 32;

/// GCM nonce size the platform uses, in bytes.
pub const AEAD_NONCE_SIZE: usize = 12;

/// Longest GCM nonce accepted on decryption, in bytes.
pub const AEAD_MAX_NONCE_SIZE: usize = 32;

/// GCM authentication tag size in bytes.
pub const AEAD_TAG_SIZE: usize = 16;

/// OAEP overhead for SHA-1: two digests plus two bytes.
const OAEP_SHA1_OVERHEAD: usize = 2 * 20 + 2;

/// Sign `data` with RSA-SHA256 (PKCS#1 v1.5) and return the base64 signature.
pub fn sign_sha256_rsa(private_key: &RsaPrivateKey, data: &[u8]) -> Result<String> {
    let digest = Sha256::digest(data);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| WxPayError::Internal(format!("RSA signing failed: {}", e)))?;
    Ok(STANDARD.encode(signature))
}

/// Verify a base64 RSA-SHA256 signature.
///
/// Returns `false` on any mismatch, including undecodable signatures.
pub fn verify_sha256_rsa(public_key: &RsaPublicKey, data: &[u8], signature_b64: &str) -> bool {
    let Ok(signature) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let digest = Sha256::digest(data);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .is_ok()
}

/// Decrypt AES-256-GCM ciphertext whose last 16 bytes are the tag.
///
/// Nonces of any length from 1 to [`AEAD_MAX_NONCE_SIZE`] bytes are accepted.
/// Lengths other than 12 derive the initial counter block through GHASH, as
/// OpenSSL does.
///
/// # Errors
///
/// - [`WxPayError::AuthenticationFailure`] if the tag does not verify
/// - [`WxPayError::MalformedPayload`] if the nonce or ciphertext has the wrong shape
/// - [`WxPayError::InvalidCredentials`] if the key is not 32 bytes
pub fn aead_decrypt(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    check_key(key)?;
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(WxPayError::malformed(format!(
            "ciphertext of {} bytes is shorter than the {}-byte tag",
            ciphertext.len(),
            AEAD_TAG_SIZE
        )));
    }

    gcm_dispatch(key, nonce, associated_data, ciphertext, Direction::Open)?
        .map_err(|_| WxPayError::AuthenticationFailure("AES-256-GCM tag mismatch".to_string()))
}

/// Encrypt with AES-256-GCM, appending the tag to the ciphertext.
///
/// The remote service is the only party that encrypts in production; this is
/// the inverse used by tests and local tooling.
pub fn aead_encrypt(
    key: &[u8],
    nonce: &[u8],
    associated_data: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    check_key(key)?;
    gcm_dispatch(key, nonce, associated_data, plaintext, Direction::Seal)?
        .map_err(|e| WxPayError::Internal(format!("AES-256-GCM encryption failed: {}", e)))
}

#[derive(Clone, Copy)]
enum Direction {
    Seal,
    Open,
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != AEAD_KEY_SIZE {
        return Err(WxPayError::InvalidCredentials(format!(
            "AEAD key must be {} bytes, got {}",
            AEAD_KEY_SIZE,
            key.len()
        )));
    }
    Ok(())
}

/// Runs GCM with the nonce size picked at runtime.
///
/// The outer error is a shape problem with the inputs, the inner one is the
/// cipher's own failure.
fn gcm_dispatch(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    msg: &[u8],
    direction: Direction,
) -> Result<std::result::Result<Vec<u8>, aes_gcm::Error>> {
    macro_rules! by_len {
        ($($len:literal => $size:ident),* $(,)?) => {
            match nonce.len() {
                AEAD_NONCE_SIZE => gcm_apply::<Aes256Gcm>(key, nonce, aad, msg, direction),
                $($len => gcm_apply::<AesGcm<Aes256, consts::$size>>(key, nonce, aad, msg, direction),)*
                0 => Err(WxPayError::malformed("AEAD nonce is empty")),
                other => Err(WxPayError::malformed(format!(
                    "AEAD nonce of {} bytes exceeds {}",
                    other, AEAD_MAX_NONCE_SIZE
                ))),
            }
        };
    }

    by_len!(
        1 => U1, 2 => U2, 3 => U3, 4 => U4, 5 => U5, 6 => U6, 7 => U7, 8 => U8,
        9 => U9, 10 => U10, 11 => U11, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
        17 => U17, 18 => U18, 19 => U19, 20 => U20, 21 => U21, 22 => U22, 23 => U23,
        24 => U24, 25 => U25, 26 => U26, 27 => U27, 28 => U28, 29 => U29, 30 => U30,
        31 => U31, 32 => U32,
    )
}

fn gcm_apply<C>(
    key: &[u8],
    nonce: &[u8],
    aad: &[u8],
    msg: &[u8],
    direction: Direction,
) -> Result<std::result::Result<Vec<u8>, aes_gcm::Error>>
where
    C: Aead + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|e| WxPayError::InvalidCredentials(e.to_string()))?;
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload { msg, aad };
    Ok(match direction {
        Direction::Seal => cipher.encrypt(nonce, payload),
        Direction::Open => cipher.decrypt(nonce, payload),
    })
}

/// Largest plaintext RSA-OAEP (SHA-1) can encrypt under `public_key`.
pub fn oaep_capacity(public_key: &RsaPublicKey) -> usize {
    public_key.size().saturating_sub(OAEP_SHA1_OVERHEAD)
}

/// Encrypt a short secret with RSA-OAEP and return base64 ciphertext.
///
/// # Errors
///
/// Returns [`WxPayError::PayloadTooLarge`] if `plaintext` exceeds [`oaep_capacity`].
pub fn rsa_oaep_encrypt(public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<String> {
    let max = oaep_capacity(public_key);
    if plaintext.len() > max {
        return Err(WxPayError::PayloadTooLarge {
            len: plaintext.len(),
            max,
        });
    }

    let ciphertext = public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), plaintext)
        .map_err(|e| WxPayError::Internal(format!("RSA-OAEP encryption failed: {}", e)))?;
    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt base64 RSA-OAEP ciphertext addressed to `private_key`.
pub fn rsa_oaep_decrypt(private_key: &RsaPrivateKey, ciphertext_b64: &str) -> Result<Vec<u8>> {
    let ciphertext = STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|e| WxPayError::malformed(format!("ciphertext is not base64: {}", e)))?;
    private_key
        .decrypt(Oaep::new::<Sha1>(), &ciphertext)
        .map_err(|_| WxPayError::AuthenticationFailure("RSA-OAEP decryption failed".to_string()))
}

/// Parse an RSA private key in PKCS#8 or PKCS#1 PEM form.
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| WxPayError::InvalidCredentials(format!("unreadable RSA private key: {}", e)))
}

/// Fields extracted from an X.509 certificate.
#[derive(Clone, Debug)]
pub struct CertificateInfo {
    /// Serial number as uppercase hex without leading zero bytes.
    pub serial_no: String,
    /// RSA public key from the certificate.
    pub public_key: RsaPublicKey,
    /// `notBefore` as unix seconds.
    pub not_before: i64,
    /// `notAfter` as unix seconds.
    pub not_after: i64,
}

/// Parse a PEM X.509 certificate carrying an RSA key.
///
/// # Errors
///
/// Returns [`WxPayError::MalformedPayload`] for anything that is not a PEM
/// certificate with an RSA public key.
pub fn parse_certificate_pem(pem: &str) -> Result<CertificateInfo> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem.trim_start().as_bytes())
        .map_err(|e| WxPayError::malformed(format!("certificate is not PEM: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| WxPayError::malformed(format!("certificate is not X.509: {}", e)))?;

    let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
        .map_err(|e| WxPayError::malformed(format!("certificate key is not RSA: {}", e)))?;

    Ok(CertificateInfo {
        serial_no: format_serial(cert.tbs_certificate.raw_serial()),
        public_key,
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
    })
}

fn format_serial(raw: &[u8]) -> String {
    let start = raw.iter().position(|b| *b != 0).unwrap_or(raw.len().saturating_sub(1));
    hex::encode_upper(&raw[start..])
}
