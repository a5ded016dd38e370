//! Signing policy engine.
//!
//! Stateless per call: every signature request is validated against the
//! lease store and a fresh simulation before the secret is touched. The
//! projected balance effect is summed across top-level metadata,
//! operation results and internal operation results, so a client cannot
//! hide spend inside a nested result to slip past the quota.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::ledger::LedgerGateway;
use crate::lease::LeaseStore;
use crate::types::{Result, SpigotError};

/// Signature approved by policy.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SignatureResponse {
    pub signature: String,
}

/// Public key material for a lease.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublicKeyResponse {
    pub public_key: String,
    pub pkh: crate::ledger::Address,
}

/// Stateless policy engine over one lease store and its ledger gateway.
pub struct SigningPolicy {
    leases: Arc<LeaseStore>,
    ledger: Arc<dyn LedgerGateway>,
}

impl SigningPolicy {
    pub fn new(leases: Arc<LeaseStore>) -> Self {
        let ledger = Arc::clone(leases.pool().ledger());
        Self { leases, ledger }
    }

    /// Return the public key of a lease's credential.
    pub async fn public_key(&self, lease_id: &str) -> Result<PublicKeyResponse> {
        let record = self.leases.get(lease_id).await?;
        let secret = record
            .secret
            .ok_or_else(|| SpigotError::NotFound(format!("lease {lease_id}")))?;
        Ok(PublicKeyResponse {
            public_key: secret.public_key_b58(),
            pkh: secret.address(),
        })
    }

    /// Validate a signing request against the lease quota and, if
    /// approved, sign the forged bytes.
    ///
    /// The stored allowance is the quota ceiling; the live on-chain
    /// balance is the funds baseline. Approval requires the projected
    /// balance (`balance + delta`) to stay at or above the allowance.
    pub async fn sign(&self, lease_id: &str, forged_bytes: &[u8]) -> Result<SignatureResponse> {
        let record = self.leases.get(lease_id).await?;
        let (secret, allowance) = match (record.secret, record.allowance) {
            (Some(secret), Some(allowance)) => (secret, allowance),
            _ => return Err(SpigotError::NotFound(format!("lease {lease_id}"))),
        };
        let address = secret.address();
        let balance = self.ledger.balance(&address).await?;

        let operation = match self.ledger.parse_operation(forged_bytes).await {
            Ok(op) => op,
            Err(SpigotError::MalformedOperation(reason)) => {
                debug!(lease = %lease_id, %reason, "unparseable signing request");
                return Err(SpigotError::MalformedOperation(reason));
            }
            Err(e) => return Err(e),
        };

        // Allow-list check before simulation: a leased credential must
        // never sign administrative or governance content.
        for content in &operation.contents {
            if !content.kind.allowed_for_lease() {
                warn!(
                    lease = %lease_id,
                    kind = content.kind.as_str(),
                    "signing request denied: kind not allowed"
                );
                return Err(SpigotError::PolicyDenied(format!(
                    "kind {} not allowed with ephemeral credentials",
                    content.kind.as_str()
                )));
            }
        }

        let simulation = self.ledger.simulate(&operation).await?;
        let delta = simulation.delta_for(&address);

        if balance + delta < allowance {
            warn!(
                lease = %lease_id,
                address = %address,
                delta,
                balance,
                allowance,
                "signing request denied: insufficient allowance"
            );
            return Err(SpigotError::PolicyDenied("insufficient allowance".into()));
        }

        // Approved: consume quota first, then sign.
        self.leases.decr(lease_id, delta.abs()).await?;
        let signature = secret.sign(forged_bytes);

        debug!(
            lease = %lease_id,
            address = %address,
            delta,
            "signing request approved"
        );
        Ok(SignatureResponse { signature })
    }
}
