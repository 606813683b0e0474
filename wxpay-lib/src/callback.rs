//! Inbound webhook processing.
//!
//! A notification is accepted only if its signature verifies against a trusted
//! platform certificate and its `resource` decrypts. Any error returned from
//! [`CallbackProcessor::process`] means the webhook must be rejected with a
//! non-2xx response so the platform retries it.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::codec::{self, EncryptedResource};
use crate::identity::ApiV3Key;
use crate::verifier::{ResponseVerifier, SignatureHeaders};
use crate::{Result, WxPayError};

/// A webhook whose signature verified and whose resource was decrypted.
///
/// Envelope fields are kept exactly as received; only `resource` is replaced
/// by the decrypted JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCallbackEvent {
    body: Map<String, Value>,
}

impl VerifiedCallbackEvent {
    /// Notification id.
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    /// Event type, e.g. `TRANSACTION.SUCCESS`.
    pub fn event_type(&self) -> Option<&str> {
        self.str_field("event_type")
    }

    /// Creation time as sent.
    pub fn create_time(&self) -> Option<&str> {
        self.str_field("create_time")
    }

    /// Human readable summary.
    pub fn summary(&self) -> Option<&str> {
        self.str_field("summary")
    }

    /// The decrypted resource.
    pub fn resource(&self) -> &Value {
        self.body.get("resource").unwrap_or(&Value::Null)
    }

    /// Deserialize the decrypted resource into a business type.
    pub fn resource_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(self.resource())
            .map_err(|e| WxPayError::malformed(format!("unexpected resource shape: {}", e)))
    }

    /// Any envelope field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// The whole event as a JSON object.
    pub fn as_json(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Consume the event, returning the whole body.
    pub fn into_json(self) -> Value {
        Value::Object(self.body)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }
}

/// Verifies and decrypts webhooks.
#[derive(Clone, Debug)]
pub struct CallbackProcessor {
    verifier: ResponseVerifier,
    api_v3_key: ApiV3Key,
}

impl CallbackProcessor {
    /// Processor checking signatures with `verifier` and decrypting with `api_v3_key`.
    pub fn new(verifier: ResponseVerifier, api_v3_key: ApiV3Key) -> Self {
        Self {
            verifier,
            api_v3_key,
        }
    }

    /// Turn a raw webhook into a verified event.
    ///
    /// `body` must be the exact bytes received; the signature covers them.
    ///
    /// # Errors
    ///
    /// - [`WxPayError::MalformedPayload`] for a body that is not a JSON object
    ///   with a `resource` object, or a resource that is not JSON once decrypted
    /// - [`WxPayError::UntrustedCertificate`] for an unknown signing serial
    /// - [`WxPayError::VerificationFailed`] for a bad signature
    /// - [`WxPayError::AuthenticationFailure`] for a tampered resource
    pub fn process(&self, headers: &SignatureHeaders, body: &[u8]) -> Result<VerifiedCallbackEvent> {
        let raw = std::str::from_utf8(body)
            .map_err(|_| WxPayError::malformed("notification body is not UTF-8"))?;

        let mut envelope = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(WxPayError::malformed("notification body is not a JSON object")),
            Err(e) => {
                return Err(WxPayError::malformed(format!(
                    "notification body is not JSON: {}",
                    e
                )))
            }
        };

        let resource: EncryptedResource = match envelope.get("resource") {
            Some(value) if value.is_object() => EncryptedResource::deserialize(value)
                .map_err(|e| WxPayError::malformed(format!("invalid resource: {}", e)))?,
            _ => return Err(WxPayError::malformed("notification has no resource object")),
        };

        self.verifier.verify_headers(headers, raw)?;

        let decrypted: Value = codec::decrypt_resource_json(&resource, &self.api_v3_key)?;
        envelope.insert("resource".to_string(), decrypted);

        Ok(VerifiedCallbackEvent { body: envelope })
    }

    /// Same as [`process`](Self::process), reading headers from name/value pairs.
    pub fn process_pairs<'a, I>(&self, headers: I, body: &[u8]) -> Result<VerifiedCallbackEvent>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let headers = SignatureHeaders::from_pairs(headers)?;
        self.process(&headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::{CertificateStore, TrustedCertificate};
    use crate::test_utils::{platform_a_private_key, sign_as_platform, SignedMessage, TestFixtures};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn processor() -> CallbackProcessor {
        let store = CertificateStore::new(
            TestFixtures::api_v3_key(),
            std::time::Duration::from_secs(3600),
        );
        store.install(vec![TrustedCertificate::from_pem(
            TestFixtures::PLATFORM_A_CERT_PEM,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()]);
        CallbackProcessor::new(
            ResponseVerifier::new(Arc::new(store)),
            TestFixtures::api_v3_key(),
        )
    }

    fn notification(plaintext: &str) -> String {
        let resource = EncryptedResource::seal(
            &TestFixtures::api_v3_key(),
            "fdasflkja484",
            "transaction",
            plaintext.as_bytes(),
        )
        .unwrap();
        json!({
            "id": "EV-2018022511223320873",
            "create_time": "2015-05-20T13:29:35+08:00",
            "resource_type": "encrypt-resource",
            "event_type": "TRANSACTION.SUCCESS",
            "summary": "支付成功",
            "resource": resource,
        })
        .to_string()
    }

    fn sign(body: &str) -> SignatureHeaders {
        let SignedMessage {
            timestamp,
            nonce,
            signature,
            serial_no,
        } = sign_as_platform(&platform_a_private_key(), TestFixtures::PLATFORM_A_SERIAL, body);
        SignatureHeaders {
            timestamp,
            nonce,
            signature,
            serial_no,
        }
    }

    #[derive(Debug, Deserialize)]
    struct Transaction {
        out_trade_no: String,
        trade_state: String,
    }

    #[test]
    fn test_process_verified_notification() {
        let body = notification(r#"{"out_trade_no":"1217752501201407033233368018","trade_state":"SUCCESS"}"#);
        let event = processor().process(&sign(&body), body.as_bytes()).unwrap();

        assert_eq!(event.id(), Some("EV-2018022511223320873"));
        assert_eq!(event.event_type(), Some("TRANSACTION.SUCCESS"));
        assert_eq!(event.summary(), Some("支付成功"));
        assert_eq!(event.get("resource_type"), Some(&json!("encrypt-resource")));
        assert_eq!(event.resource()["trade_state"], "SUCCESS");

        let transaction: Transaction = event.resource_as().unwrap();
        assert_eq!(transaction.out_trade_no, "1217752501201407033233368018");
        assert_eq!(transaction.trade_state, "SUCCESS");
    }

    #[test]
    fn test_tampered_ciphertext_fails_authentication() {
        let body = notification(r#"{"trade_state":"SUCCESS"}"#);
        let mut value: Value = serde_json::from_str(&body).unwrap();
        let ciphertext = value["resource"]["ciphertext"].as_str().unwrap();
        let mut raw = STANDARD.decode(ciphertext).unwrap();
        raw[3] ^= 0x80;
        value["resource"]["ciphertext"] = json!(STANDARD.encode(raw));
        let tampered = value.to_string();

        let result = processor().process(&sign(&tampered), tampered.as_bytes());
        assert!(matches!(result, Err(WxPayError::AuthenticationFailure(_))));
    }

    #[test]
    fn test_signature_over_different_body_fails_verification() {
        let body = notification(r#"{"trade_state":"SUCCESS"}"#);
        let headers = sign(&body);
        let altered = body.replace("TRANSACTION.SUCCESS", "REFUND.SUCCESS");

        let result = processor().process(&headers, altered.as_bytes());
        assert!(matches!(result, Err(WxPayError::VerificationFailed(_))));
    }

    #[test]
    fn test_unknown_serial_is_untrusted() {
        let body = notification(r#"{}"#);
        let mut headers = sign(&body);
        headers.serial_no = TestFixtures::PLATFORM_B_SERIAL.to_string();

        let result = processor().process(&headers, body.as_bytes());
        assert!(matches!(result, Err(WxPayError::UntrustedCertificate { .. })));
    }

    #[test]
    fn test_missing_resource_is_malformed() {
        let processor = processor();
        for body in [r#"{"id":"1"}"#, r#"{"resource":"x"}"#, "[]", "not json"] {
            let result = processor.process(&sign(body), body.as_bytes());
            assert!(
                matches!(result, Err(WxPayError::MalformedPayload(_))),
                "{body}: {result:?}"
            );
        }
    }

    #[test]
    fn test_decrypted_non_json_is_malformed() {
        let body = notification("plain text");
        let result = processor().process(&sign(&body), body.as_bytes());
        assert!(matches!(result, Err(WxPayError::MalformedPayload(_))));
    }

    #[test]
    fn test_process_pairs() {
        let body = notification(r#"{"trade_state":"CLOSED"}"#);
        let signed = sign_as_platform(&platform_a_private_key(), TestFixtures::PLATFORM_A_SERIAL, &body);
        let headers = signed.headers();
        let event = processor()
            .process_pairs(headers.iter().map(|(k, v)| (k.as_str(), v.as_str())), body.as_bytes())
            .unwrap();
        assert_eq!(event.resource()["trade_state"], "CLOSED");
        assert_eq!(event.into_json()["id"], "EV-2018022511223320873");
    }
}
