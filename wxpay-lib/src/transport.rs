//! Signed HTTP transport.
//!
//! [`HttpTransport`] signs each [`ApiCall`] with the merchant key, sends it,
//! and maps transport failures and non-2xx statuses to [`WxPayError`].
//! Response signature checks happen one layer up, in [`crate::WxPayClient`].

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

pub use reqwest::Method;

use crate::certificates::{CertificateListing, CertificateSource};
use crate::config::ClientConfig;
use crate::signer::{self, RequestSigner};
use crate::verifier::HEADER_SERIAL;
use crate::{Result, WxPayError};

/// Path of the certificate listing endpoint.
pub const CERTIFICATES_PATH: &str = "/v3/certificates";

/// One outbound call, before signing.
///
/// The body is serialized once when attached; the same string is signed and
/// sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<String>,
    platform_serial: Option<String>,
}

impl ApiCall {
    /// Call `method` on an absolute API path such as `/v3/pay/transactions/jsapi`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            platform_serial: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Append a query parameter. Values are URL-encoded.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    /// Use an already serialized JSON body verbatim.
    pub fn raw_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Name the platform certificate that encrypted fields in the body target.
    ///
    /// Sent as `Wechatpay-Serial`.
    pub fn with_platform_serial(mut self, serial_no: impl Into<String>) -> Self {
        self.platform_serial = Some(serial_no.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn platform_serial(&self) -> Option<&str> {
        self.platform_serial.as_deref()
    }

    /// Path plus encoded query string, as signed.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish();
        let separator = if self.path.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.path, separator, query)
    }
}

/// A 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl ApiResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw body text. Empty for `204 No Content`.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            WxPayError::Serialization(format!("failed to parse response body: {}", e))
        })
    }
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

/// Caller hooks around each signed call.
///
/// All methods default to doing nothing. They run on the calling task, so keep
/// them cheap.
pub trait ClientHooks: Send + Sync {
    /// Before signing. Changes made here are signed and sent.
    fn before_sign(&self, _call: &mut ApiCall) {}

    /// After signing, just before the request leaves.
    fn after_sign(&self, _request: &SignedRequest<'_>) {}

    /// On each 2xx response, before its signature is checked.
    fn on_response(&self, _response: &ApiResponse) {}
}

/// A request as signed, handed to [`ClientHooks::after_sign`].
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub authorization: &'a str,
    pub platform_serial: Option<&'a str>,
    pub body: Option<&'a str>,
}

/// Sends signed calls over HTTPS.
#[derive(Clone)]
pub struct HttpTransport {
    config: ClientConfig,
    signer: RequestSigner,
    client: reqwest::Client,
    hooks: Option<Arc<dyn ClientHooks>>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .field("hooks", &self.hooks.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build the HTTP client.
    pub fn new(config: ClientConfig, signer: RequestSigner) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| WxPayError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            signer,
            client,
            hooks: None,
        })
    }

    /// Install caller hooks, replacing any previous ones.
    pub fn with_hooks(mut self, hooks: Arc<dyn ClientHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    /// Full URL for `call`, as it goes on the wire.
    ///
    /// Non-ASCII and reserved characters in the path come back
    /// percent-encoded. This is the form that gets signed.
    pub fn request_url(&self, call: &ApiCall) -> Result<Url> {
        let url = self.config.url(&call.path_and_query());
        Url::parse(&url).map_err(|e| WxPayError::invalid_config("url", format!("{}: {}", url, e)))
    }

    /// Sign and send `call`.
    ///
    /// Hooks, if set, see the unsigned call, then the signed request, then
    /// any 2xx response.
    ///
    /// # Errors
    ///
    /// - [`WxPayError::Timeout`] / [`WxPayError::ConnectionFailed`] /
    ///   [`WxPayError::Transport`] for network failures
    /// - [`WxPayError::Api`] for non-2xx statuses
    pub async fn send(&self, call: &ApiCall) -> Result<ApiResponse> {
        let call = match &self.hooks {
            Some(hooks) => {
                let mut call = call.clone();
                hooks.before_sign(&mut call);
                Cow::Owned(call)
            }
            None => Cow::Borrowed(call),
        };

        let url = self.request_url(&call)?;
        let path_and_query = signer::path_and_query(url.as_str())?;
        let body = call.body().unwrap_or("");
        let authorization = self
            .signer
            .authorization(call.method().as_str(), &path_and_query, body)?;

        if let Some(hooks) = &self.hooks {
            hooks.after_sign(&SignedRequest {
                method: call.method(),
                url: &url,
                authorization: &authorization,
                platform_serial: call.platform_serial(),
                body: call.body(),
            });
        }

        let mut request = self
            .client
            .request(call.method().clone(), url)
            .header(AUTHORIZATION, authorization)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(serial_no) = call.platform_serial() {
            request = request.header(HEADER_SERIAL, serial_no);
        }
        if let Some(body) = call.body() {
            request = request.body(body.to_string());
        }

        tracing::debug!(method = %call.method(), path = %path_and_query, "sending signed request");
        let response = request
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e, &path_and_query))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(e, &path_and_query))?;

        if !status.is_success() {
            return Err(map_status_error(status, &text));
        }

        let response = ApiResponse {
            status,
            headers,
            body: text,
        };
        if let Some(hooks) = &self.hooks {
            hooks.on_response(&response);
        }
        Ok(response)
    }

    fn map_reqwest_error(&self, e: reqwest::Error, path: &str) -> WxPayError {
        if e.is_timeout() {
            WxPayError::Timeout {
                operation: path.to_string(),
                timeout_ms: self.config.timeout_secs * 1000,
            }
        } else if e.is_connect() {
            WxPayError::ConnectionFailed {
                target: self.config.base_url.clone(),
                reason: e.to_string(),
            }
        } else {
            WxPayError::Transport(format!("request to {} failed: {}", path, e))
        }
    }
}

fn map_status_error(status: StatusCode, body: &str) -> WxPayError {
    let (code, message) = match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => (err.code, err.message),
        Err(_) => (
            status
                .canonical_reason()
                .unwrap_or("UNKNOWN")
                .to_ascii_uppercase()
                .replace(' ', "_"),
            body.to_string(),
        ),
    };
    WxPayError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

/// Fetches the listing with a merchant-signed `GET /v3/certificates`.
///
/// The listing response is decrypted by the store but its signature is not
/// checked: verifying it would need the very certificates being fetched.
/// Trust rests on the APIv3 key, which only the merchant and the platform
/// hold. Integrators who need more can pin certificates with
/// [`crate::certificates::CertificateStore::install`] and disable automatic
/// updates.
#[async_trait]
impl CertificateSource for HttpTransport {
    async fn fetch_certificates(&self) -> Result<CertificateListing> {
        self.send(&ApiCall::get(CERTIFICATES_PATH)).await?.json()
    }
}
