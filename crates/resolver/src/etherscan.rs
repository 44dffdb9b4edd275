//! Online resolver over an Etherscan-compatible explorer API plus an
//! openchain-style 4-byte signature database.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use alloy_primitives::{hex, Address};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use formula_ir::ContractModel;

use crate::{AddressQuery, ContractInfo, ContractResolver, ResolverError, SourceLayout};

/// Turns resolved source metadata into an IR-level model.
///
/// Model production is the extraction pipeline's job; online deployments
/// inject it here. [`NullModelProvider`] is the placeholder used when no
/// pipeline is wired in.
pub trait ModelProvider: fmt::Debug + Send + Sync {
    fn provide(&self, info: &ContractInfo) -> Result<Option<Arc<ContractModel>>, ResolverError>;
}

/// Provider that produces nothing; calls through it resolve to "unknown
/// callee" and are skipped by the engine.
#[derive(Debug, Default)]
pub struct NullModelProvider;

impl ModelProvider for NullModelProvider {
    fn provide(&self, info: &ContractInfo) -> Result<Option<Arc<ContractModel>>, ResolverError> {
        debug!(target: "resolver", contract = %info.name, "no model provider configured");
        Ok(None)
    }
}

const DEFAULT_SIGNATURE_URL: &str = "https://api.openchain.xyz/signature-database/v1/lookup";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolver backed by a block-explorer API.
#[derive(Debug)]
pub struct EtherscanResolver {
    client: reqwest::blocking::Client,
    api_url: String,
    api_key: Option<String>,
    signature_url: String,
    provider: Arc<dyn ModelProvider>,
    cache: RwLock<HashMap<Address, Arc<ContractModel>>>,
}

impl EtherscanResolver {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<Self, ResolverError> {
        let client = reqwest::blocking::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
            signature_url: DEFAULT_SIGNATURE_URL.into(),
            provider,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_signature_url(mut self, url: impl Into<String>) -> Self {
        self.signature_url = url.into();
        self
    }

    pub(crate) fn parse_source_response(
        body: &str,
    ) -> Result<Option<ContractInfo>, ResolverError> {
        let response: SourceCodeResponse = serde_json::from_str(body)?;
        if response.status != "1" {
            return Err(ResolverError::Api(response.message));
        }
        let Some(entry) = response.result.into_iter().next() else {
            return Ok(None);
        };
        if entry.source_code.is_empty() {
            // unverified contract
            return Ok(None);
        }
        let compiler_version =
            (!entry.compiler_version.is_empty()).then_some(entry.compiler_version);
        Ok(Some(ContractInfo {
            name: entry.contract_name,
            compiler_version,
            source: SourceLayout::File(entry.source_code),
        }))
    }

    pub(crate) fn parse_signature_response(
        body: &str,
        selector: &str,
    ) -> Result<Option<String>, ResolverError> {
        let response: SignatureResponse = serde_json::from_str(body)?;
        if !response.ok {
            return Err(ResolverError::Api("signature lookup rejected".into()));
        }
        let signature = response
            .result
            .function
            .get(selector)
            .and_then(|entries| entries.first())
            .map(|entry| entry.name.clone());
        Ok(signature)
    }
}

impl ContractResolver for EtherscanResolver {
    fn resolve_address(&self, query: &AddressQuery<'_>) -> Option<Address> {
        // a constant 160-bit value in the variable's formulas wins outright
        if let Some(address) = query.candidates.first() {
            trace!(target: "resolver", var = query.name, %address, "resolved from formula constant");
            return Some(*address);
        }
        debug!(
            target: "resolver",
            var = query.name,
            caller = %query.caller,
            "no constant address available for destination"
        );
        None
    }

    fn source_for(&self, address: Address) -> Result<Option<ContractInfo>, ResolverError> {
        let mut request = self
            .client
            .get(&self.api_url)
            .query(&[("module", "contract"), ("action", "getsourcecode")])
            .query(&[("address", format!("{address}"))]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key.as_str())]);
        }
        let body = request.send()?.error_for_status()?.text()?;
        Self::parse_source_response(&body)
    }

    fn contract_for(
        &self,
        info: &ContractInfo,
    ) -> Result<Option<Arc<ContractModel>>, ResolverError> {
        self.provider.provide(info)
    }

    fn signature_for_selector(&self, selector: [u8; 4]) -> Result<Option<String>, ResolverError> {
        let hexed = format!("0x{}", hex::encode(selector));
        let body = self
            .client
            .get(&self.signature_url)
            .query(&[("function", hexed.as_str()), ("filter", "true")])
            .send()?
            .error_for_status()?
            .text()?;
        let signature = Self::parse_signature_response(&body, &hexed)?;
        if signature.is_none() {
            warn!(target: "resolver", selector = %hexed, "selector not in signature database");
        }
        Ok(signature)
    }

    fn cached(&self, address: Address) -> Option<Arc<ContractModel>> {
        self.cache.read().get(&address).cloned()
    }

    fn insert_cached(&self, address: Address, model: Arc<ContractModel>) {
        self.cache.write().insert(address, model);
    }
}

#[derive(Debug, Deserialize)]
struct SourceCodeResponse {
    status: String,
    message: String,
    result: Vec<SourceCodeEntry>,
}

#[derive(Debug, Deserialize)]
struct SourceCodeEntry {
    #[serde(rename = "ContractName")]
    contract_name: String,
    #[serde(rename = "CompilerVersion", default)]
    compiler_version: String,
    #[serde(rename = "SourceCode", default)]
    source_code: String,
}

#[derive(Debug, Deserialize)]
struct SignatureResponse {
    ok: bool,
    result: SignatureResult,
}

#[derive(Debug, Deserialize)]
struct SignatureResult {
    #[serde(default)]
    function: HashMap<String, Vec<SignatureEntry>>,
}

#[derive(Debug, Deserialize)]
struct SignatureEntry {
    name: String,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_verified_source_payload() {
        let body = r#"{
            "status": "1",
            "message": "OK",
            "result": [{
                "ContractName": "PancakePair",
                "CompilerVersion": "v0.5.16+commit.9c3226ce",
                "SourceCode": "pragma solidity =0.5.16; contract PancakePair {}"
            }]
        }"#;
        let info = EtherscanResolver::parse_source_response(body).unwrap().unwrap();
        assert_eq!(info.name, "PancakePair");
        assert_eq!(info.compiler_version.as_deref(), Some("v0.5.16+commit.9c3226ce"));
        assert!(matches!(info.source, SourceLayout::File(src) if src.contains("PancakePair")));
    }

    #[test]
    fn unverified_source_is_none() {
        let body = r#"{"status":"1","message":"OK","result":[{"ContractName":"","SourceCode":""}]}"#;
        assert_eq!(EtherscanResolver::parse_source_response(body).unwrap(), None);
    }

    #[test]
    fn api_errors_are_surfaced() {
        let body = r#"{"status":"0","message":"NOTOK","result":[]}"#;
        let err = EtherscanResolver::parse_source_response(body).unwrap_err();
        assert!(matches!(err, ResolverError::Api(msg) if msg == "NOTOK"));
    }

    #[test]
    fn parses_signature_payload() {
        let body = r#"{
            "ok": true,
            "result": {
                "function": {
                    "0xa9059cbb": [{"name": "transfer(address,uint256)"}]
                }
            }
        }"#;
        let sig = EtherscanResolver::parse_signature_response(body, "0xa9059cbb").unwrap();
        assert_eq!(sig.as_deref(), Some("transfer(address,uint256)"));
        let missing = EtherscanResolver::parse_signature_response(body, "0xdeadbeef").unwrap();
        assert_eq!(missing, None);
    }
}
