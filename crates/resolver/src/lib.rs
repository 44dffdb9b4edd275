//! Bridges the engine to contract discovery: deployed-address resolution,
//! source lookup, model production and 4-byte selector decoding.
//!
//! The engine sees only the [`ContractResolver`] trait. Two implementations
//! ship in-tree: [`LocalResolver`] serves models supplied up front (offline
//! mode), [`EtherscanResolver`] talks to an Etherscan-compatible API and an
//! openchain-style signature database (online mode). Resolution can hit the
//! network, so resolved models are always cached by address; the cache is
//! the only process-wide state of the whole analysis.

use std::{collections::HashMap, fmt, sync::Arc};

use alloy_primitives::Address;
use parking_lot::RwLock;
use tracing::{debug, warn};

use formula_ir::ContractModel;

mod etherscan;

pub use etherscan::{EtherscanResolver, ModelProvider, NullModelProvider};

/// Errors surfaced by resolver implementations.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("explorer API error: {0}")]
    Api(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Where a resolved contract's source lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceLayout {
    /// Single flattened file.
    File(String),
    /// Multi-file source tree with a designated main file.
    Dir { dir: String, main: String },
}

/// Source metadata for a deployed contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractInfo {
    pub name: String,
    pub compiler_version: Option<String>,
    pub source: SourceLayout,
}

/// What the engine knows about a variable it wants resolved to an address:
/// its display name and the constant 160-bit values extracted from its
/// current formulas.
#[derive(Clone, Debug)]
pub struct AddressQuery<'a> {
    pub name: &'a str,
    pub candidates: &'a [Address],
    pub caller: Address,
}

/// External collaborator interface for inter-contract calls.
pub trait ContractResolver: fmt::Debug + Send + Sync {
    /// Resolves a variable holding a contract reference to a deployed
    /// address, or `None` when the reference cannot be pinned down.
    fn resolve_address(&self, query: &AddressQuery<'_>) -> Option<Address>;

    /// Source metadata for a deployed address.
    fn source_for(&self, address: Address) -> Result<Option<ContractInfo>, ResolverError>;

    /// Produces the IR-level model for resolved source.
    fn contract_for(&self, info: &ContractInfo)
        -> Result<Option<Arc<ContractModel>>, ResolverError>;

    /// Function signature for a 4-byte dispatch selector.
    fn signature_for_selector(&self, selector: [u8; 4]) -> Result<Option<String>, ResolverError>;

    fn cached(&self, address: Address) -> Option<Arc<ContractModel>>;

    fn insert_cached(&self, address: Address, model: Arc<ContractModel>);

    /// Cache-through model lookup. Lookups are synchronous with respect to
    /// the driver; the cache bounds their cost.
    fn contract_at(&self, address: Address) -> Option<Arc<ContractModel>> {
        if let Some(model) = self.cached(address) {
            return Some(model);
        }
        let info = match self.source_for(address) {
            Ok(Some(info)) => info,
            Ok(None) => return None,
            Err(err) => {
                warn!(target: "resolver", %address, %err, "source lookup failed");
                return None;
            }
        };
        let model = match self.contract_for(&info) {
            Ok(Some(model)) => model,
            Ok(None) => return None,
            Err(err) => {
                warn!(target: "resolver", contract = %info.name, %err, "model production failed");
                return None;
            }
        };
        self.insert_cached(address, model.clone());
        Some(model)
    }
}

/// Registry-backed resolver for offline analysis: only locally supplied
/// contracts are reachable.
#[derive(Debug, Default)]
pub struct LocalResolver {
    contracts: RwLock<HashMap<Address, Arc<ContractModel>>>,
    selectors: RwLock<HashMap<[u8; 4], String>>,
}

impl LocalResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model under its own `this` address and records every
    /// function selector for low-level call decoding.
    pub fn register(&self, model: Arc<ContractModel>) -> Address {
        let address = model.this_address();
        self.register_at(address, model);
        address
    }

    pub fn register_at(&self, address: Address, model: Arc<ContractModel>) {
        let mut selectors = self.selectors.write();
        for function in &model.functions {
            selectors.insert(function.selector(), function.signature.clone());
        }
        drop(selectors);
        self.contracts.write().insert(address, model);
    }
}

impl ContractResolver for LocalResolver {
    fn resolve_address(&self, query: &AddressQuery<'_>) -> Option<Address> {
        let contracts = self.contracts.read();
        let found = query.candidates.iter().find(|a| contracts.contains_key(*a)).copied();
        if found.is_none() {
            debug!(target: "resolver", var = query.name, "no locally registered contract matches");
        }
        found
    }

    fn source_for(&self, _address: Address) -> Result<Option<ContractInfo>, ResolverError> {
        Ok(None)
    }

    fn contract_for(
        &self,
        _info: &ContractInfo,
    ) -> Result<Option<Arc<ContractModel>>, ResolverError> {
        Ok(None)
    }

    fn signature_for_selector(&self, selector: [u8; 4]) -> Result<Option<String>, ResolverError> {
        Ok(self.selectors.read().get(&selector).cloned())
    }

    fn cached(&self, address: Address) -> Option<Arc<ContractModel>> {
        self.contracts.read().get(&address).cloned()
    }

    fn insert_cached(&self, address: Address, model: Arc<ContractModel>) {
        self.contracts.write().insert(address, model);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use formula_ir::builder::{ContractBuilder, FunctionBuilder};
    use formula_ir::TypeRef;

    fn token() -> Arc<ContractModel> {
        let transfer = FunctionBuilder::new("transfer")
            .param("to", TypeRef::address())
            .param("amount", TypeRef::uint256())
            .build();
        Arc::new(ContractBuilder::new("Token").path("Token.sol").function(transfer).build())
    }

    #[test]
    fn register_and_resolve() {
        let resolver = LocalResolver::new();
        let model = token();
        let address = resolver.register(model.clone());

        let query =
            AddressQuery { name: "token", candidates: &[address], caller: Address::ZERO };
        assert_eq!(resolver.resolve_address(&query), Some(address));
        assert_eq!(resolver.contract_at(address).unwrap().name, "Token");
    }

    #[test]
    fn unknown_candidates_resolve_to_none() {
        let resolver = LocalResolver::new();
        resolver.register(token());
        let stranger = Address::repeat_byte(9);
        let query =
            AddressQuery { name: "token", candidates: &[stranger], caller: Address::ZERO };
        assert_eq!(resolver.resolve_address(&query), None);
    }

    #[test]
    fn selector_round_trip() {
        let resolver = LocalResolver::new();
        let model = token();
        resolver.register(model.clone());
        let selector = model.functions[0].selector();
        assert_eq!(
            resolver.signature_for_selector(selector).unwrap().as_deref(),
            Some("transfer(address,uint256)")
        );
    }
}
