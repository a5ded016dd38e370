//! HTTP implementation of the ledger gateway.
//!
//! Talks to a node's JSON API. Remote non-success replies are surfaced
//! as [`SpigotError::Upstream`] with the node's status and body so the
//! HTTP layer can pass them through to the caller verbatim.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::types::{Result, SpigotError};

use super::{Address, LedgerGateway, SimulationResult, UnsignedOperation};

/// Placeholder signature attached for simulation. The node checks shape,
/// not validity, during a dry run, so any well-formed signature works.
const DUMMY_SIGNATURE: &str =
    "edsigtkpiSSschcaCt9pUVrpNPf7TTcgvgDEDD6NCEHMy8NNQJCGnMfLZzYoQj74yLjo9wx6MPVV29CvVzgi7qEcEUok3k7AuMg";

#[derive(Debug, Deserialize)]
struct BlockHeader {
    level: u64,
}

#[derive(Debug, Serialize)]
struct FundingDest<'a> {
    destination: &'a Address,
    #[serde(with = "amount_string")]
    amount: i64,
}

mod amount_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct FundingReceipt {
    operation_hash: String,
}

/// Node-backed [`LedgerGateway`].
pub struct RpcGateway {
    client: reqwest::Client,
    base_url: String,
    funding_timeout: Duration,
}

impl RpcGateway {
    /// Build a gateway for one node endpoint.
    ///
    /// `timeout` bounds each individual round-trip; batch-funding
    /// confirmation is held open by the funder endpoint and gets a
    /// generous multiple of it.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SpigotError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            funding_timeout: timeout * 10,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SpigotError::Internal(format!("read response: {e}")))?;
        if !status.is_success() {
            return Err(SpigotError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| SpigotError::Internal(format!("decode response: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| SpigotError::Internal(format!("rpc get {path}: {e}")))?;
        Self::read(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| SpigotError::Internal(format!("rpc post {path}: {e}")))?;
        Self::read(response).await
    }
}

#[async_trait]
impl LedgerGateway for RpcGateway {
    async fn balance(&self, address: &Address) -> Result<i64> {
        // The node serializes balances as decimal strings.
        let raw: String = self
            .get_json(&format!(
                "/chains/main/blocks/head/context/contracts/{address}/balance"
            ))
            .await?;
        raw.parse::<i64>()
            .map_err(|e| SpigotError::Internal(format!("balance for {address}: {e}")))
    }

    async fn height(&self) -> Result<u64> {
        let header: BlockHeader = self.get_json("/chains/main/blocks/head/header").await?;
        Ok(header.level)
    }

    async fn funder_balance(&self) -> Result<i64> {
        let raw: String = self.get_json("/funder/balance").await?;
        raw.parse::<i64>()
            .map_err(|e| SpigotError::Internal(format!("funder balance: {e}")))
    }

    async fn submit_batch_funding(&self, dests: &[(Address, i64)]) -> Result<String> {
        let body: Vec<FundingDest<'_>> = dests
            .iter()
            .map(|(destination, amount)| FundingDest {
                destination,
                amount: *amount,
            })
            .collect();
        // The funder endpoint injects one batch transfer and holds the
        // request open until the operation is confirmed, so it gets the
        // longer timeout.
        let response = self
            .client
            .post(self.url("/funder/batch_transfer"))
            .timeout(self.funding_timeout)
            .json(&json!(body))
            .send()
            .await
            .map_err(|e| SpigotError::Internal(format!("rpc post /funder/batch_transfer: {e}")))?;
        let receipt: FundingReceipt = Self::read(response).await?;
        debug!(op_hash = %receipt.operation_hash, dests = dests.len(), "funding batch confirmed");
        Ok(receipt.operation_hash)
    }

    async fn parse_operation(&self, bytes: &[u8]) -> Result<UnsignedOperation> {
        let body = json!({ "data": hex::encode(bytes) });
        match self
            .post_json::<UnsignedOperation>("/chains/main/blocks/head/helpers/parse/operations", &body)
            .await
        {
            Ok(op) => Ok(op),
            // A parse rejection is the client's fault, not the node's.
            Err(SpigotError::Upstream { status, body }) if status < 500 => {
                Err(SpigotError::MalformedOperation(body))
            }
            Err(e) => Err(e),
        }
    }

    async fn simulate(&self, op: &UnsignedOperation) -> Result<SimulationResult> {
        let chain_id: String = self.get_json("/chains/main/chain_id").await?;
        let body = json!({
            "chain_id": chain_id,
            "operation": {
                "branch": op.branch,
                "contents": op.contents,
                "signature": DUMMY_SIGNATURE,
            },
        });
        self.post_json(
            "/chains/main/blocks/head/helpers/scripts/run_operation",
            &body,
        )
        .await
    }
}
