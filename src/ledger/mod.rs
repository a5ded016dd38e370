//! Ledger gateway capability.
//!
//! Everything spigot knows about the chain goes through the
//! [`LedgerGateway`] trait: keypair generation, balance and height
//! queries, batch funding, operation parsing, dry-run simulation, and
//! byte signing. The production implementation lives in [`rpc`]; tests
//! substitute a scripted mock behind the same trait.

pub mod rpc;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{Result, SpigotError};

pub use rpc::RpcGateway;

/// Ed25519 secret key length (32 bytes).
pub const SECRET_KEY_LEN: usize = 32;

/// Address payload length (20-byte digest of the public key).
pub const ADDRESS_DIGEST_LEN: usize = 20;

// =============================================================================
// Credential material
// =============================================================================

/// A signing secret capable of deriving exactly one address.
///
/// This is the credential the pools issue and the lease store guards.
/// Zeroized on drop; never printed in cleartext (the `Debug` impl is
/// redacted).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode from the base58 form used in the store.
    pub fn from_b58(s: &str) -> Result<Self> {
        let raw = bs58::decode(s)
            .into_vec()
            .map_err(|e| SpigotError::Internal(format!("invalid secret encoding: {e}")))?;
        let bytes: [u8; SECRET_KEY_LEN] = raw
            .try_into()
            .map_err(|_| SpigotError::Internal("invalid secret length".into()))?;
        Ok(Self(bytes))
    }

    /// Base58 form for store persistence.
    pub fn to_b58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Derive the one address this secret controls.
    pub fn address(&self) -> Address {
        let signing_key = SigningKey::from_bytes(&self.0);
        Address::from_verifying_key(&signing_key.verifying_key())
    }

    /// Base58 form of the public (verifying) key.
    pub fn public_key_b58(&self) -> String {
        let signing_key = SigningKey::from_bytes(&self.0);
        bs58::encode(signing_key.verifying_key().to_bytes()).into_string()
    }

    /// Sign arbitrary bytes, returning the base58-encoded signature.
    pub fn sign(&self, bytes: &[u8]) -> String {
        let signing_key = SigningKey::from_bytes(&self.0);
        let signature = signing_key.sign(bytes);
        bs58::encode(signature.to_bytes()).into_string()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey(redacted, address {})", self.address())
    }
}

/// Generate a fresh keypair from the OS random source.
pub fn generate_keypair() -> (SecretKey, Address) {
    let mut bytes = [0u8; SECRET_KEY_LEN];
    OsRng.fill_bytes(&mut bytes);
    let secret = SecretKey::from_bytes(bytes);
    let address = secret.address();
    (secret, address)
}

/// A chain address derived from a public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Derive from an Ed25519 verifying key: base58 of the truncated
    /// SHA-256 digest, prefixed for readability.
    pub fn from_verifying_key(key: &ed25519_dalek::VerifyingKey) -> Self {
        let digest = Sha256::digest(key.to_bytes());
        let payload = &digest[..ADDRESS_DIGEST_LEN];
        Self(format!("sp1{}", bs58::encode(payload).into_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Operations and simulation results
// =============================================================================

/// Operation content kinds the node understands.
///
/// Only `Transaction`, `Origination` and `Reveal` may be signed with a
/// leased credential; everything else is refused by the policy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Transaction,
    Origination,
    Reveal,
    Delegation,
    #[serde(other)]
    Other,
}

impl OperationKind {
    /// Whether this kind is on the ephemeral-signing allow-list.
    pub fn allowed_for_lease(&self) -> bool {
        matches!(
            self,
            OperationKind::Transaction | OperationKind::Origination | OperationKind::Reveal
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Transaction => "transaction",
            OperationKind::Origination => "origination",
            OperationKind::Reveal => "reveal",
            OperationKind::Delegation => "delegation",
            OperationKind::Other => "other",
        }
    }
}

/// One content of an unsigned operation. The kind is lifted out for the
/// policy allow-list; the rest of the content passes through untouched
/// so simulation sees exactly what the client forged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContent {
    pub kind: OperationKind,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

/// A parsed, unsigned operation group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsignedOperation {
    #[serde(default)]
    pub branch: String,
    pub contents: Vec<OperationContent>,
}

/// Signed integer that the node serializes as a decimal string.
mod string_i64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<i64>().map_err(serde::de::Error::custom)
    }
}

/// A single balance effect from simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    /// Address whose balance changes.
    pub contract: Address,
    /// Signed change in the ledger's smallest unit.
    #[serde(with = "string_i64")]
    pub change: i64,
}

/// Result carried by an operation or internal operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationResult {
    #[serde(default)]
    pub balance_updates: Vec<BalanceUpdate>,
}

/// An internal sub-operation spawned during execution. Its balance
/// effects count toward the lease delta just like top-level ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalResult {
    #[serde(default)]
    pub result: OperationResult,
}

/// Simulation outcome for one operation content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResult {
    pub kind: OperationKind,
    /// Fee and counter effects reported at the metadata level.
    #[serde(default)]
    pub balance_updates: Vec<BalanceUpdate>,
    /// The content's own execution result.
    #[serde(default)]
    pub operation_result: OperationResult,
    /// Internal operations emitted during execution.
    #[serde(default)]
    pub internal_operation_results: Vec<InternalResult>,
}

impl ContentResult {
    /// Sum every balance effect on `address` across the metadata, the
    /// operation result and all internal results. Skipping the nested
    /// layers would let a client under-report spend.
    pub fn delta_for(&self, address: &Address) -> i64 {
        let direct: i64 = self
            .balance_updates
            .iter()
            .chain(self.operation_result.balance_updates.iter())
            .filter(|u| &u.contract == address)
            .map(|u| u.change)
            .sum();
        let internal: i64 = self
            .internal_operation_results
            .iter()
            .flat_map(|i| i.result.balance_updates.iter())
            .filter(|u| &u.contract == address)
            .map(|u| u.change)
            .sum();
        direct + internal
    }
}

/// Full simulation result for an operation group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub contents: Vec<ContentResult>,
}

impl SimulationResult {
    /// Net balance effect of the whole group on `address`.
    pub fn delta_for(&self, address: &Address) -> i64 {
        self.contents.iter().map(|c| c.delta_for(address)).sum()
    }
}

// =============================================================================
// Gateway trait
// =============================================================================

/// Capability boundary to the ledger node.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Generate a fresh credential. Pure entropy, no chain round-trip.
    fn generate_keypair(&self) -> (SecretKey, Address) {
        generate_keypair()
    }

    /// Current spendable balance of `address` in the smallest unit.
    async fn balance(&self, address: &Address) -> Result<i64>;

    /// Current chain height.
    async fn height(&self) -> Result<u64>;

    /// Balance of the funding account backing this gateway's pool.
    async fn funder_balance(&self) -> Result<i64>;

    /// Submit one batch transaction funding every destination, blocking
    /// until on-chain confirmation. Returns the operation handle.
    async fn submit_batch_funding(&self, dests: &[(Address, i64)]) -> Result<String>;

    /// Parse forged operation bytes into a structured, unsigned group.
    async fn parse_operation(&self, bytes: &[u8]) -> Result<UnsignedOperation>;

    /// Dry-run an unsigned operation against current chain state.
    async fn simulate(&self, op: &UnsignedOperation) -> Result<SimulationResult>;
}

// =============================================================================
// Test double
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_roundtrip() {
        let (secret, address) = generate_keypair();
        let encoded = secret.to_b58();
        let decoded = SecretKey::from_b58(&encoded).unwrap();
        assert_eq!(decoded.address(), address);
        assert!(address.as_str().starts_with("sp1"));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let (secret, _) = generate_keypair();
        let debug = format!("{secret:?}");
        assert!(!debug.contains(&secret.to_b58()));
    }

    #[test]
    fn test_signature_is_verifiable() {
        let (secret, _) = generate_keypair();
        let message = b"forged operation bytes";
        let sig_b58 = secret.sign(message);

        let signing_key = SigningKey::from_bytes(&{
            let raw = bs58::decode(secret.to_b58()).into_vec().unwrap();
            <[u8; 32]>::try_from(raw).unwrap()
        });
        let sig_bytes: [u8; 64] = bs58::decode(&sig_b58)
            .into_vec()
            .unwrap()
            .try_into()
            .unwrap();
        use ed25519_dalek::Verifier;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        assert!(signing_key.verifying_key().verify(message, &sig).is_ok());
    }

    #[test]
    fn test_kind_allow_list() {
        assert!(OperationKind::Transaction.allowed_for_lease());
        assert!(OperationKind::Origination.allowed_for_lease());
        assert!(OperationKind::Reveal.allowed_for_lease());
        assert!(!OperationKind::Delegation.allowed_for_lease());
        assert!(!OperationKind::Other.allowed_for_lease());
    }

    #[test]
    fn test_kind_deserializes_unknown_as_other() {
        let kind: OperationKind = serde_json::from_str("\"ballot\"").unwrap();
        assert_eq!(kind, OperationKind::Other);
    }

    #[test]
    fn test_delta_includes_nested_updates() {
        let address = Address("sp1target".into());
        let other = Address("sp1other".into());
        let content = ContentResult {
            kind: OperationKind::Transaction,
            balance_updates: vec![BalanceUpdate {
                contract: address.clone(),
                change: -300,
            }],
            operation_result: OperationResult {
                balance_updates: vec![BalanceUpdate {
                    contract: other.clone(),
                    change: 300,
                }],
            },
            internal_operation_results: vec![InternalResult {
                result: OperationResult {
                    balance_updates: vec![BalanceUpdate {
                        contract: address.clone(),
                        change: -50,
                    }],
                },
            }],
        };
        let result = SimulationResult {
            contents: vec![content],
        };
        assert_eq!(result.delta_for(&address), -350);
        assert_eq!(result.delta_for(&other), 300);
    }

    #[test]
    fn test_balance_update_wire_format() {
        let json = r#"{"contract":"sp1abc","change":"-1200"}"#;
        let update: BalanceUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.change, -1200);
        assert_eq!(update.contract.as_str(), "sp1abc");

        let back = serde_json::to_value(&update).unwrap();
        assert_eq!(back["change"], "-1200");
    }

    #[test]
    fn test_simulation_result_parses_node_shape() {
        let json = r#"{
            "contents": [{
                "kind": "transaction",
                "balance_updates": [{"contract": "sp1a", "change": "-10"}],
                "operation_result": {
                    "balance_updates": [{"contract": "sp1a", "change": "-90"}]
                },
                "internal_operation_results": [
                    {"result": {"balance_updates": [{"contract": "sp1a", "change": "-5"}]}}
                ]
            }]
        }"#;
        let result: SimulationResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.delta_for(&Address("sp1a".into())), -105);
    }
}
