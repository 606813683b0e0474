//! The client: one merchant identity, one trust store, one HTTP transport.
//!
//! There is no global registry of clients. Build one per merchant and share it
//! (`WxPayClient` is cheap to clone).

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::callback::{CallbackProcessor, VerifiedCallbackEvent};
use crate::certificates::{CertificateStore, TrustSnapshot};
use crate::codec::{self, EncryptedFields, EncryptedResource, FieldPath};
use crate::config::ClientConfig;
use crate::identity::MerchantIdentity;
use crate::paysign::{self, AppPayParams, JsapiPayParams};
use crate::signer::RequestSigner;
use crate::transport::{ApiCall, ApiResponse, ClientHooks, HttpTransport};
use crate::verifier::{ResponseVerifier, SignatureHeaders};
use crate::Result;

/// WeChat Pay API v3 client.
#[derive(Clone, Debug)]
pub struct WxPayClient {
    config: ClientConfig,
    identity: Arc<MerchantIdentity>,
    store: Arc<CertificateStore>,
    transport: HttpTransport,
    verifier: ResponseVerifier,
    callbacks: CallbackProcessor,
}

impl WxPayClient {
    /// Build a client with an empty trust store.
    ///
    /// With `auto_update_certificates` the store is filled on first use.
    pub fn new(config: ClientConfig, identity: MerchantIdentity) -> Result<Self> {
        let store = Arc::new(CertificateStore::new(
            identity.api_v3_key().clone(),
            std::time::Duration::from_secs(config.refresh_interval_secs),
        ));
        Self::with_store(config, identity, store)
    }

    /// Build a client around an existing trust store.
    pub fn with_store(
        config: ClientConfig,
        identity: MerchantIdentity,
        store: Arc<CertificateStore>,
    ) -> Result<Self> {
        config.validate()?;
        let identity = Arc::new(identity);
        let signer = RequestSigner::new(identity.clone()).with_nonce_len(config.nonce_len);
        let transport = HttpTransport::new(config.clone(), signer)?;
        let verifier = ResponseVerifier::new(store.clone());
        let callbacks = CallbackProcessor::new(verifier.clone(), identity.api_v3_key().clone());

        Ok(Self {
            config,
            identity,
            store,
            transport,
            verifier,
            callbacks,
        })
    }

    /// Build a client and try to load the platform certificates.
    ///
    /// A failed initial refresh is logged, not returned; the next call retries.
    pub async fn connect(config: ClientConfig, identity: MerchantIdentity) -> Result<Self> {
        let client = Self::new(config, identity)?;
        if let Err(e) = client.update_certificates(false).await {
            warn!(error = %e, "initial certificate refresh failed");
        }
        Ok(client)
    }

    /// Install hooks for every later signed call, certificate listing
    /// fetches included.
    pub fn with_hooks(mut self, hooks: Arc<dyn ClientHooks>) -> Self {
        self.transport = self.transport.with_hooks(hooks);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &MerchantIdentity {
        &self.identity
    }

    pub fn certificate_store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// Refresh platform certificates if stale, or unconditionally with `force`.
    ///
    /// Returns whether a refresh happened.
    pub async fn update_certificates(&self, force: bool) -> Result<bool> {
        self.store.ensure_fresh(&self.transport, force).await
    }

    /// The trusted certificates as of now.
    pub fn certificates(&self) -> Arc<TrustSnapshot> {
        self.store.snapshot()
    }

    async fn refresh_if_enabled(&self) -> Result<()> {
        if self.config.auto_update_certificates {
            self.update_certificates(false).await?;
        }
        Ok(())
    }

    /// Sign and send one call, then verify the response signature.
    ///
    /// # Errors
    ///
    /// Besides transport and [`crate::WxPayError::Api`] errors, a 2xx response
    /// whose signature does not verify fails with
    /// [`crate::WxPayError::VerificationFailed`] or
    /// [`crate::WxPayError::UntrustedCertificate`].
    #[tracing::instrument(skip(self, call), fields(method = %call.method(), path = %call.path()))]
    pub async fn execute(&self, call: ApiCall) -> Result<ApiResponse> {
        self.refresh_if_enabled().await?;

        let response = self.transport.send(&call).await?;

        if self.config.verify_responses {
            let headers = SignatureHeaders::from_header_map(response.headers())?;
            self.verifier.verify_headers(&headers, response.body())?;
            debug!(serial_no = %headers.serial_no, "response signature verified");
        }
        Ok(response)
    }

    /// Encrypt sensitive fields to the current platform certificate.
    ///
    /// Missing paths are logged and skipped. Attach the returned serial with
    /// [`ApiCall::with_platform_serial`].
    pub async fn encrypt_fields(&self, value: &Value, paths: &[&str]) -> Result<EncryptedFields> {
        let paths = FieldPath::parse_all(paths)?;
        self.encrypt_field_paths(value, &paths, &codec::warn_missing_field)
            .await
    }

    /// [`encrypt_fields`](Self::encrypt_fields) with a custom missing-field hook.
    pub async fn encrypt_field_paths(
        &self,
        value: &Value,
        paths: &[FieldPath],
        on_missing: &(dyn Fn(&FieldPath) + Send + Sync),
    ) -> Result<EncryptedFields> {
        self.refresh_if_enabled().await?;

        let certificate = self.store.current()?;
        let value = codec::encrypt_fields(value, paths, certificate.public_key(), on_missing)?;
        Ok(EncryptedFields {
            value,
            serial_no: certificate.serial_no().to_string(),
        })
    }

    /// Verify and decrypt an inbound webhook.
    ///
    /// A stale store is refreshed first; if that refresh fails the webhook is
    /// still checked against the certificates already held. Any error means
    /// the webhook must be rejected.
    #[tracing::instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        headers: &SignatureHeaders,
        body: &[u8],
    ) -> Result<VerifiedCallbackEvent> {
        if let Err(e) = self.refresh_if_enabled().await {
            warn!(error = %e, "certificate refresh failed, verifying with existing certificates");
        }
        self.callbacks.process(headers, body)
    }

    /// Decrypt an AEAD resource (e.g. from a query response) into `T`.
    pub fn decrypt_resource<T: DeserializeOwned>(&self, resource: &EncryptedResource) -> Result<T> {
        codec::decrypt_resource_json(resource, self.identity.api_v3_key())
    }

    /// Decrypt a sensitive field addressed to the merchant key.
    pub fn decrypt_sensitive(&self, ciphertext_b64: &str) -> Result<String> {
        self.identity.decrypt_sensitive(ciphertext_b64)
    }

    /// Signed parameters for JSAPI / mini-program payment.
    pub fn jsapi_pay_params(&self, app_id: &str, prepay_id: &str) -> Result<JsapiPayParams> {
        paysign::jsapi_params(&self.identity, app_id, prepay_id)
    }

    /// Signed parameters for app payment.
    pub fn app_pay_params(&self, app_id: &str, prepay_id: &str) -> Result<AppPayParams> {
        paysign::app_params(&self.identity, app_id, prepay_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::TrustedCertificate;
    use crate::test_utils::{platform_a_private_key, TestFixtures};
    use crate::WxPayError;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn offline_client() -> WxPayClient {
        let config = ClientConfig::new("http://127.0.0.1:9")
            .with_auto_update_certificates(false)
            .with_timeout(1);
        let client = WxPayClient::new(config, TestFixtures::merchant_identity()).unwrap();
        client.certificate_store().install(vec![TrustedCertificate::from_pem(
            TestFixtures::PLATFORM_A_CERT_PEM,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap(),
        )
        .unwrap()]);
        client
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = WxPayClient::new(
            ClientConfig::default().with_timeout(0),
            TestFixtures::merchant_identity(),
        );
        assert!(matches!(result, Err(WxPayError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_encrypt_fields_targets_current_certificate() {
        let client = offline_client();
        let input = json!({"payee": {"bank_account": "6222021234567890"}});

        let encrypted = client
            .encrypt_fields(&input, &["payee.bank_account"])
            .await
            .unwrap();

        assert_eq!(encrypted.serial_no, TestFixtures::PLATFORM_A_SERIAL);
        let ciphertext = encrypted.value["payee"]["bank_account"].as_str().unwrap();
        let plaintext =
            crate::crypto::rsa_oaep_decrypt(&platform_a_private_key(), ciphertext).unwrap();
        assert_eq!(plaintext, b"6222021234567890");
        assert_eq!(input["payee"]["bank_account"], "6222021234567890");
    }

    #[tokio::test]
    async fn test_encrypt_fields_rejects_bad_path() {
        let client = offline_client();
        let result = client.encrypt_fields(&json!({}), &["a..b"]).await;
        assert!(matches!(result, Err(WxPayError::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_encrypt_fields_without_certificates() {
        let config = ClientConfig::default().with_auto_update_certificates(false);
        let client = WxPayClient::new(config, TestFixtures::merchant_identity()).unwrap();
        let result = client.encrypt_fields(&json!({"a": "b"}), &["a"]).await;
        assert!(matches!(result, Err(WxPayError::NoTrustedCertificates)));
    }

    #[test]
    fn test_decrypt_resource() {
        let client = offline_client();
        let resource = EncryptedResource::seal(
            &TestFixtures::api_v3_key(),
            "0123456789ab",
            "refund",
            br#"{"refund_status":"SUCCESS"}"#,
        )
        .unwrap();
        let value: Value = client.decrypt_resource(&resource).unwrap();
        assert_eq!(value["refund_status"], "SUCCESS");
    }

    #[test]
    fn test_pay_params_use_merchant_identity() {
        let client = offline_client();
        let params = client.app_pay_params("wx8888888888888888", "WX123").unwrap();
        assert_eq!(params.partner_id, TestFixtures::MCHID);
        let params = client.jsapi_pay_params("wx8888888888888888", "WX123").unwrap();
        assert_eq!(params.package, "prepay_id=WX123");
    }
}
