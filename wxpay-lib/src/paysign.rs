//! Signed parameters for client-side payment invocation.
//!
//! After an order is placed the merchant backend hands the front end a set of
//! parameters signed with the merchant key. Field names follow the casing the
//! client SDKs expect.

use serde::{Deserialize, Serialize};

use crate::identity::MerchantIdentity;
use crate::signer::{generate_nonce, unix_timestamp, DEFAULT_NONCE_LEN};
use crate::Result;

/// Join fields with `\n` and terminate with `\n`.
pub fn build_message<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    fields.into_iter().fold(String::new(), |mut message, field| {
        message.push_str(field.as_ref());
        message.push('\n');
        message
    })
}

/// Parameters for JSAPI and mini-program payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsapiPayParams {
    pub app_id: String,
    pub time_stamp: String,
    pub nonce_str: String,
    pub package: String,
    pub sign_type: String,
    pub pay_sign: String,
}

/// Parameters for native app payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPayParams {
    pub app_id: String,
    pub partner_id: String,
    pub prepay_id: String,
    pub package: String,
    pub nonce_str: String,
    pub time_stamp: String,
    pub sign: String,
}

/// Sign JSAPI parameters for `prepay_id`.
pub fn jsapi_params(
    identity: &MerchantIdentity,
    app_id: &str,
    prepay_id: &str,
) -> Result<JsapiPayParams> {
    jsapi_params_at(
        identity,
        app_id,
        prepay_id,
        &unix_timestamp(),
        &generate_nonce(DEFAULT_NONCE_LEN),
    )
}

fn jsapi_params_at(
    identity: &MerchantIdentity,
    app_id: &str,
    prepay_id: &str,
    time_stamp: &str,
    nonce_str: &str,
) -> Result<JsapiPayParams> {
    let package = format!("prepay_id={}", prepay_id);
    let message = build_message([app_id, time_stamp, nonce_str, package.as_str()]);
    let pay_sign = identity.sign(message.as_bytes())?;

    Ok(JsapiPayParams {
        app_id: app_id.to_string(),
        time_stamp: time_stamp.to_string(),
        nonce_str: nonce_str.to_string(),
        package,
        sign_type: "RSA".to_string(),
        pay_sign,
    })
}

/// Sign app payment parameters for `prepay_id`.
pub fn app_params(
    identity: &MerchantIdentity,
    app_id: &str,
    prepay_id: &str,
) -> Result<AppPayParams> {
    let time_stamp = unix_timestamp();
    let nonce_str = generate_nonce(DEFAULT_NONCE_LEN);
    let message = build_message([app_id, time_stamp.as_str(), nonce_str.as_str(), prepay_id]);
    let sign = identity.sign(message.as_bytes())?;

    Ok(AppPayParams {
        app_id: app_id.to_string(),
        partner_id: identity.mchid().to_string(),
        prepay_id: prepay_id.to_string(),
        package: "Sign=WXPay".to_string(),
        nonce_str,
        time_stamp,
        sign,
    })
}
