//! Direct-merchant versus service-provider calls.
//!
//! Many endpoints exist twice: once for a merchant acting for itself and once
//! for a service provider acting for a sub-merchant (`/v3/pay/partner/...`).
//! The variant is chosen by the caller's type, not by inspecting request
//! fields at runtime.

use serde::Serialize;

use crate::transport::{ApiCall, Method};
use crate::Result;

/// Who the call is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerchantScope {
    /// The merchant acts for itself.
    Direct,
    /// A service provider acts for a sub-merchant.
    Provider,
}

/// The two paths of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopedPath {
    pub direct: &'static str,
    pub provider: &'static str,
}

impl ScopedPath {
    pub const fn new(direct: &'static str, provider: &'static str) -> Self {
        Self { direct, provider }
    }

    /// Path for `scope`.
    pub fn for_scope(&self, scope: MerchantScope) -> &'static str {
        match scope {
            MerchantScope::Direct => self.direct,
            MerchantScope::Provider => self.provider,
        }
    }
}

/// A request body for either variant of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopedCall<D, P> {
    DirectMerchant(D),
    Provider(P),
}

impl<D, P> ScopedCall<D, P> {
    pub fn scope(&self) -> MerchantScope {
        match self {
            Self::DirectMerchant(_) => MerchantScope::Direct,
            Self::Provider(_) => MerchantScope::Provider,
        }
    }
}

impl<D: Serialize, P: Serialize> ScopedCall<D, P> {
    /// Serialize the body and pick the matching path.
    pub fn into_api_call(self, method: Method, path: &ScopedPath) -> Result<ApiCall> {
        let call = ApiCall::new(method, path.for_scope(self.scope()));
        match &self {
            Self::DirectMerchant(body) => call.json(body),
            Self::Provider(body) => call.json(body),
        }
    }
}
