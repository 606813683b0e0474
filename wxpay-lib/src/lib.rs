//! WeChat Pay API v3 trust core.
//!
//! This crate handles the cryptographic side of talking to WeChat Pay: it
//! signs outbound requests with the merchant key, verifies responses and
//! webhooks against the platform certificates, keeps those certificates fresh,
//! and encrypts or decrypts protected payloads. Endpoint catalogs and business
//! validation live with the caller.
//!
//! # Features
//!
//! - **Request signing**: `WECHATPAY2-SHA256-RSA2048` `Authorization` headers
//! - **Response verification**: platform signatures checked per serial number
//! - **Certificate store**: lazily refreshed, swapped atomically on refresh
//! - **Payload codec**: AES-256-GCM resources in, RSA-OAEP sensitive fields out
//! - **Webhooks**: verified and decrypted in one step
//! - **Hooks**: optional [`ClientHooks`] see each call before and after signing
//!
//! # Example
//!
//! ```ignore
//! use wxpay_lib::{ApiCall, ClientConfig, MerchantIdentity, WxPayClient};
//!
//! let identity = MerchantIdentity::from_files(
//!     "1900000001",
//!     "apiclient_cert.pem",
//!     "apiclient_key.pem",
//!     std::env::var("WXPAY_API_V3_KEY")?,
//! )?;
//! let client = WxPayClient::connect(ClientConfig::from_env()?, identity).await?;
//!
//! let response = client
//!     .execute(ApiCall::get("/v3/pay/transactions/out-trade-no/1217752501201407033233368018")
//!         .query("mchid", "1900000001"))
//!     .await?;
//! let transaction: serde_json::Value = response.json()?;
//! ```

pub mod callback;
pub mod certificates;
pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod identity;
pub mod paysign;
pub mod scope;
pub mod signer;
pub mod transport;
pub mod verifier;

/// Test utilities: PEM fixtures, sealed certificate listings, mock sources.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use callback::{CallbackProcessor, VerifiedCallbackEvent};
pub use certificates::{CertificateSource, CertificateStore, TrustSnapshot, TrustedCertificate};
pub use client::WxPayClient;
pub use codec::{EncryptedFields, EncryptedResource, FieldPath};
pub use config::ClientConfig;
pub use errors::{WxPayError, WxPayErrorCode};
pub use identity::{ApiV3Key, MerchantIdentity};
pub use scope::{MerchantScope, ScopedCall, ScopedPath};
pub use signer::{AuthScheme, RequestSigner, SigningEnvelope};
pub use transport::{ApiCall, ApiResponse, ClientHooks, HttpTransport, Method, SignedRequest};
pub use verifier::{ResponseVerifier, SignatureHeaders};

/// Common result alias for wxpay-lib operations.
pub type Result<T> = std::result::Result<T, WxPayError>;
