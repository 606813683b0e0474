//! Payload codec: AEAD resources inbound, RSA-OAEP fields outbound.
//!
//! Inbound payloads (certificate listings, webhook `resource` objects) arrive
//! as [`EncryptedResource`]s sealed with the merchant's APIv3 key. Outbound
//! sensitive fields (bank account numbers, holder names) are encrypted to the
//! platform certificate's public key before the request body is serialized.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::RsaPublicKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto;
use crate::identity::ApiV3Key;
use crate::{Result, WxPayError};

/// The only AEAD algorithm the protocol uses.
pub const AEAD_AES_256_GCM: &str = "AEAD_AES_256_GCM";

/// Wire shape of an AEAD-protected payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedResource {
    /// Algorithm name, always `AEAD_AES_256_GCM`.
    pub algorithm: String,
    /// Nonce string, used as raw bytes. The platform sends 12 characters.
    pub nonce: String,
    /// Associated data, used as raw bytes. May be empty.
    #[serde(default)]
    pub associated_data: String,
    /// Base64 ciphertext with the 16-byte tag appended.
    pub ciphertext: String,
    /// Type of the object before encryption (webhooks only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
}

impl EncryptedResource {
    /// Seal `plaintext` the way the remote service does.
    ///
    /// Only the remote service encrypts in production. This exists for tests
    /// and local tooling.
    pub fn seal(
        key: &ApiV3Key,
        nonce: &str,
        associated_data: &str,
        plaintext: &[u8],
    ) -> Result<Self> {
        let ciphertext = crypto::aead_encrypt(
            key.as_bytes(),
            nonce.as_bytes(),
            associated_data.as_bytes(),
            plaintext,
        )?;
        Ok(Self {
            algorithm: AEAD_AES_256_GCM.to_string(),
            nonce: nonce.to_string(),
            associated_data: associated_data.to_string(),
            ciphertext: STANDARD.encode(ciphertext),
            original_type: None,
        })
    }
}

/// Decrypt a resource to UTF-8 text.
///
/// # Errors
///
/// - [`WxPayError::AuthenticationFailure`] on tag mismatch
/// - [`WxPayError::MalformedPayload`] for an unknown algorithm, non-base64
///   ciphertext or non-UTF-8 plaintext
pub fn decrypt_resource(resource: &EncryptedResource, key: &ApiV3Key) -> Result<String> {
    if resource.algorithm != AEAD_AES_256_GCM {
        return Err(WxPayError::malformed(format!(
            "unsupported resource algorithm {}",
            resource.algorithm
        )));
    }

    let ciphertext = STANDARD
        .decode(resource.ciphertext.trim())
        .map_err(|e| WxPayError::malformed(format!("resource ciphertext is not base64: {}", e)))?;

    let plaintext = crypto::aead_decrypt(
        key.as_bytes(),
        resource.nonce.as_bytes(),
        resource.associated_data.as_bytes(),
        &ciphertext,
    )?;

    String::from_utf8(plaintext)
        .map_err(|_| WxPayError::malformed("decrypted resource is not UTF-8"))
}

/// Decrypt a resource and parse the plaintext as JSON.
///
/// A plaintext that authenticates but does not parse is
/// [`WxPayError::MalformedPayload`], never [`WxPayError::AuthenticationFailure`].
pub fn decrypt_resource_json<T: DeserializeOwned>(
    resource: &EncryptedResource,
    key: &ApiV3Key,
) -> Result<T> {
    let plaintext = decrypt_resource(resource, key)?;
    serde_json::from_str(&plaintext)
        .map_err(|e| WxPayError::malformed(format!("decrypted resource is not valid JSON: {}", e)))
}

/// Field path parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldPathError {
    #[error("field path is empty")]
    Empty,
    #[error("field path {0:?} has an empty segment")]
    EmptySegment(String),
}

impl From<FieldPathError> for WxPayError {
    fn from(err: FieldPathError) -> Self {
        WxPayError::invalid_config("field_path", err.to_string())
    }
}

/// A parsed dotted path into a JSON object, e.g. `account.number`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path.
    pub fn parse(path: &str) -> std::result::Result<Self, FieldPathError> {
        if path.is_empty() {
            return Err(FieldPathError::Empty);
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(FieldPathError::EmptySegment(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Parse several paths at once.
    pub fn parse_all<I, S>(paths: I) -> std::result::Result<Vec<Self>, FieldPathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths.into_iter().map(|p| Self::parse(p.as_ref())).collect()
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn resolve_mut<'v>(&self, root: &'v mut Value) -> Option<&'v mut Value> {
        self.segments
            .iter()
            .try_fold(root, |node, segment| node.as_object_mut()?.get_mut(segment))
    }
}

impl FromStr for FieldPath {
    type Err = FieldPathError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

/// Result of [`encrypt_fields`] as returned by the client.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedFields {
    /// Copy of the input with targeted fields replaced by base64 ciphertext.
    pub value: Value,
    /// Serial number of the certificate the fields were encrypted to.
    ///
    /// Send it as the `Wechatpay-Serial` header.
    pub serial_no: String,
}

/// Default diagnostic for a path that does not resolve.
pub fn warn_missing_field(path: &FieldPath) {
    tracing::warn!(path = %path, "sensitive field not present, left unencrypted");
}

/// Encrypt string fields of a JSON object to `public_key`.
///
/// Works on a deep copy; `value` is never modified. For each path:
/// - a non-empty string is replaced with its RSA-OAEP ciphertext
/// - an empty string or a non-string value is left as is
/// - a path that does not resolve is reported to `on_missing` and skipped
pub fn encrypt_fields(
    value: &Value,
    paths: &[FieldPath],
    public_key: &RsaPublicKey,
    on_missing: &dyn Fn(&FieldPath),
) -> Result<Value> {
    let mut copy = value.clone();

    for path in paths {
        let Some(target) = path.resolve_mut(&mut copy) else {
            on_missing(path);
            continue;
        };
        let Value::String(plaintext) = target else {
            continue;
        };
        if plaintext.is_empty() {
            continue;
        }
        let ciphertext = crypto::rsa_oaep_encrypt(public_key, plaintext.as_bytes())?;
        *target = Value::String(ciphertext);
    }

    Ok(copy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{platform_a_private_key, TestFixtures};
    use serde_json::json;
    use std::sync::Mutex;

    fn api_key() -> ApiV3Key {
        ApiV3Key::new(TestFixtures::API_V3_KEY).unwrap()
    }

    #[test]
    fn test_decrypt_resource_known_answer() {
        let resource: EncryptedResource = serde_json::from_value(json!({
            "algorithm": "AEAD_AES_256_GCM",
            "nonce": "ab12cd34ef56",
            "associated_data": "transaction",
            "ciphertext": "z98HFNTl0yJYMcfHtVQGJ1yZ9C6QXeOVkWWu5x7rl9a8gVPrUQPE8zAdq9LD4y+Y+kRo/iEoGDeJh2QoMHRrdiXDPMWoYE1+2KLhhlnIP2qukCLp82Xp",
            "original_type": "transaction"
        }))
        .unwrap();

        let decrypted: Value = decrypt_resource_json(&resource, &api_key()).unwrap();
        assert_eq!(decrypted["trade_state"], "SUCCESS");
        assert_eq!(decrypted["out_trade_no"], "1217752501201407033233368018");
    }

    #[test]
    fn test_decrypt_resource_with_one_byte_nonce() {
        use aes_gcm::aead::{consts::U1, generic_array::GenericArray, Aead, KeyInit, Payload};
        use aes_gcm::{aes::Aes256, AesGcm};

        let cipher = AesGcm::<Aes256, U1>::new_from_slice(TestFixtures::API_V3_KEY.as_bytes())
            .unwrap();
        let ciphertext = cipher
            .encrypt(
                GenericArray::from_slice(b"n"),
                Payload {
                    msg: br#"{"ok":true}"#,
                    aad: b"ad",
                },
            )
            .unwrap();
        let resource: EncryptedResource = serde_json::from_value(json!({
            "algorithm": "AEAD_AES_256_GCM",
            "nonce": "n",
            "associated_data": "ad",
            "ciphertext": STANDARD.encode(ciphertext),
        }))
        .unwrap();

        let decrypted: Value = decrypt_resource_json(&resource, &api_key()).unwrap();
        assert_eq!(decrypted, json!({"ok": true}));
    }

    #[test]
    fn test_missing_associated_data_defaults_to_empty() {
        let sealed = EncryptedResource::seal(&api_key(), "0123456789ab", "", b"{}").unwrap();
        let resource: EncryptedResource = serde_json::from_value(json!({
            "algorithm": sealed.algorithm,
            "nonce": sealed.nonce,
            "ciphertext": sealed.ciphertext,
        }))
        .unwrap();
        assert_eq!(resource.associated_data, "");
        assert_eq!(decrypt_resource(&resource, &api_key()).unwrap(), "{}");
    }

    #[test]
    fn test_decrypt_rejects_unknown_algorithm() {
        let mut resource =
            EncryptedResource::seal(&api_key(), "0123456789ab", "ad", b"{}").unwrap();
        resource.algorithm = "AEAD_SM4_GCM".to_string();
        assert!(matches!(
            decrypt_resource(&resource, &api_key()),
            Err(WxPayError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_non_json_plaintext_is_malformed_not_tampered() {
        let resource =
            EncryptedResource::seal(&api_key(), "0123456789ab", "ad", b"not json").unwrap();
        assert!(matches!(
            decrypt_resource_json::<Value>(&resource, &api_key()),
            Err(WxPayError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let mut resource =
            EncryptedResource::seal(&api_key(), "0123456789ab", "ad", b"{\"a\":1}").unwrap();
        let mut raw = STANDARD.decode(&resource.ciphertext).unwrap();
        raw[0] ^= 0x01;
        resource.ciphertext = STANDARD.encode(raw);

        assert!(matches!(
            decrypt_resource(&resource, &api_key()),
            Err(WxPayError::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn test_field_path_parse() {
        let path = FieldPath::parse("account.number").unwrap();
        assert_eq!(path.segments(), ["account", "number"]);
        assert_eq!(path.to_string(), "account.number");

        assert_eq!(FieldPath::parse(""), Err(FieldPathError::Empty));
        assert!(matches!(
            "a..b".parse::<FieldPath>(),
            Err(FieldPathError::EmptySegment(_))
        ));
    }

    #[test]
    fn test_encrypt_fields_copies_and_encrypts() {
        let private_key = platform_a_private_key();
        let input = json!({
            "account": { "number": "6222021234567890", "bank": "ICBC" },
            "name": "张三"
        });
        let paths = FieldPath::parse_all(["account.number", "name"]).unwrap();

        let output =
            encrypt_fields(&input, &paths, &private_key.to_public_key(), &|_| {}).unwrap();

        assert_eq!(input["account"]["number"], "6222021234567890");
        assert_eq!(output["account"]["bank"], "ICBC");

        let number = output["account"]["number"].as_str().unwrap();
        assert_ne!(number, "6222021234567890");
        let decrypted = crypto::rsa_oaep_decrypt(&private_key, number).unwrap();
        assert_eq!(decrypted, b"6222021234567890");

        let name = output["name"].as_str().unwrap();
        assert_eq!(
            crypto::rsa_oaep_decrypt(&private_key, name).unwrap(),
            "张三".as_bytes()
        );
    }

    #[test]
    fn test_encrypt_fields_reports_missing_paths() {
        let public_key = platform_a_private_key().to_public_key();
        let input = json!({ "account": { "bank": "ICBC" }, "scalar": "x", "empty": "", "n": 5 });
        let paths =
            FieldPath::parse_all(["account.number", "scalar.inner", "empty", "n", "nope.deep"])
                .unwrap();

        let missing = Mutex::new(Vec::new());
        let output = encrypt_fields(&input, &paths, &public_key, &|p| {
            missing.lock().unwrap().push(p.to_string())
        })
        .unwrap();

        assert_eq!(output, input);
        assert_eq!(
            missing.into_inner().unwrap(),
            vec!["account.number", "scalar.inner", "nope.deep"]
        );
    }

    #[test]
    fn test_encrypt_fields_too_large() {
        let public_key = platform_a_private_key().to_public_key();
        let input = json!({ "blob": "x".repeat(300) });
        let paths = FieldPath::parse_all(["blob"]).unwrap();
        assert!(matches!(
            encrypt_fields(&input, &paths, &public_key, &warn_missing_field),
            Err(WxPayError::PayloadTooLarge { .. })
        ));
    }
}
