//! PEM fixtures and keys.
//!
//! The key pairs and self-signed certificates under `fixtures/` were generated
//! offline so tests never pay for RSA key generation.

use rsa::RsaPrivateKey;

use crate::crypto::parse_private_key_pem;
use crate::identity::{ApiV3Key, MerchantIdentity};

/// Collection of commonly used test fixtures.
pub struct TestFixtures;

impl TestFixtures {
    /// Merchant id used across tests.
    pub const MCHID: &'static str = "1900000001";

    /// A valid 32-byte APIv3 key.
    pub const API_V3_KEY: &'static str = "0123456789abcdef0123456789abcdef";

    /// Merchant API certificate.
    pub const MERCHANT_CERT_PEM: &'static str = include_str!("fixtures/merchant_cert.pem");
    /// Merchant private key (PKCS#8).
    pub const MERCHANT_KEY_PEM: &'static str = include_str!("fixtures/merchant_key.pem");
    /// Serial number of [`Self::MERCHANT_CERT_PEM`].
    pub const MERCHANT_SERIAL: &'static str = "3775B6A45ACD588826D15E583A95F5DD4D23F1B7";

    /// First platform certificate.
    pub const PLATFORM_A_CERT_PEM: &'static str = include_str!("fixtures/platform_a_cert.pem");
    /// Private key matching [`Self::PLATFORM_A_CERT_PEM`].
    pub const PLATFORM_A_KEY_PEM: &'static str = include_str!("fixtures/platform_a_key.pem");
    /// Serial number of [`Self::PLATFORM_A_CERT_PEM`].
    pub const PLATFORM_A_SERIAL: &'static str = "5157F09EFDC096DE15EBE81A47057A7232F1B8E1";

    /// Second platform certificate, used for rotation scenarios.
    pub const PLATFORM_B_CERT_PEM: &'static str = include_str!("fixtures/platform_b_cert.pem");
    /// Private key matching [`Self::PLATFORM_B_CERT_PEM`].
    pub const PLATFORM_B_KEY_PEM: &'static str = include_str!("fixtures/platform_b_key.pem");
    /// Serial number of [`Self::PLATFORM_B_CERT_PEM`].
    pub const PLATFORM_B_SERIAL: &'static str = "7132D72A03E93CDDF8C03BBD1F37EEDF3A8E8ACE";

    /// The APIv3 key as a typed value.
    pub fn api_v3_key() -> ApiV3Key {
        ApiV3Key::new(Self::API_V3_KEY).expect("fixture APIv3 key is 32 bytes")
    }

    /// Merchant identity built from the merchant fixtures.
    pub fn merchant_identity() -> MerchantIdentity {
        MerchantIdentity::from_pem(
            Self::MCHID,
            Self::MERCHANT_CERT_PEM,
            Self::MERCHANT_KEY_PEM,
            Self::API_V3_KEY,
        )
        .expect("fixture merchant identity is valid")
    }
}

/// Merchant private key.
pub fn merchant_private_key() -> RsaPrivateKey {
    parse_private_key_pem(TestFixtures::MERCHANT_KEY_PEM).expect("fixture key parses")
}

/// Private key of platform certificate A.
pub fn platform_a_private_key() -> RsaPrivateKey {
    parse_private_key_pem(TestFixtures::PLATFORM_A_KEY_PEM).expect("fixture key parses")
}

/// Private key of platform certificate B.
pub fn platform_b_private_key() -> RsaPrivateKey {
    parse_private_key_pem(TestFixtures::PLATFORM_B_KEY_PEM).expect("fixture key parses")
}
