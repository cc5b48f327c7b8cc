// Wallet capability
//
// Signing, proof generation and transaction submission are delegated to an
// external wallet.
// `RemoteWallet` forwards requests to a wallet bridge over HTTP.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::abi::ContractCall;
use crate::error::WalletError;

const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Give up on a pending transaction after about five minutes
const MAX_RESULT_POLLS: u32 = 150;

/// Parameters for the sign-in message the wallet builds and signs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    pub domain: String,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub statement: String,
    pub expiration_time: DateTime<Utc>,
}

/// World ID verify command
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRequest {
    pub action: String,
    pub signal: String,
    pub verification_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub address: Address,
    pub message: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed,
    Failed(String),
}

#[async_trait]
pub trait WalletCapability: Send + Sync {
    async fn request_signature(&self, request: &SignatureRequest)
        -> Result<SignedMessage, WalletError>;

    /// Ask the wallet for a proof of personhood; returns the proof payload
    async fn request_verification(&self, request: &VerificationRequest)
        -> Result<Value, WalletError>;

    /// Submit a pre-encoded call; returns the wallet's transaction id
    async fn submit_transaction(&self, call: &ContractCall) -> Result<String, WalletError>;

    /// Resolve once the transaction reached a final state
    async fn subscribe_to_result(&self, transaction_id: &str) -> Result<TxOutcome, WalletError>;
}

pub struct RemoteWallet {
    client: Client,
    base_url: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl RemoteWallet {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval: RESULT_POLL_INTERVAL,
            max_polls: MAX_RESULT_POLLS,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls.max(1);
        self
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, WalletError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Forwarding wallet request to {}", url);
        let value: Value = self.client.post(&url).json(body).send().await?.json().await?;
        into_success(value)
    }
}

/// Bridge responses carry `status`; errors carry `error_code`
fn into_success(value: Value) -> Result<Value, WalletError> {
    match value["status"].as_str() {
        Some("success") => Ok(value),
        Some("error") => Err(WalletError::Rejected(
            value["error_code"]
                .as_str()
                .unwrap_or("unknown_error")
                .to_string(),
        )),
        _ => Err(WalletError::InvalidResponse(value.to_string())),
    }
}

#[async_trait]
impl WalletCapability for RemoteWallet {
    async fn request_signature(
        &self,
        request: &SignatureRequest,
    ) -> Result<SignedMessage, WalletError> {
        let body = serde_json::to_value(request)
            .map_err(|e| WalletError::InvalidResponse(e.to_string()))?;
        let value = self.post("/sign_message", &body).await?;
        serde_json::from_value(value).map_err(|e| WalletError::InvalidResponse(e.to_string()))
    }

    async fn request_verification(
        &self,
        request: &VerificationRequest,
    ) -> Result<Value, WalletError> {
        let body = serde_json::to_value(request)
            .map_err(|e| WalletError::InvalidResponse(e.to_string()))?;
        let proof = self.post("/verify", &body).await?;
        info!("Wallet produced a {} proof for {}", request.verification_level, request.action);
        Ok(proof)
    }

    async fn submit_transaction(&self, call: &ContractCall) -> Result<String, WalletError> {
        let body = json!({
            "transaction": [{
                "address": call.to,
                "functionName": call.function,
                "data": call.data,
            }]
        });
        let value = self.post("/send_transaction", &body).await?;
        let transaction_id = value["transaction_id"]
            .as_str()
            .ok_or_else(|| WalletError::InvalidResponse("missing transaction_id".into()))?;
        info!("Wallet accepted {} as {}", call.function, transaction_id);
        Ok(transaction_id.to_string())
    }

    async fn subscribe_to_result(&self, transaction_id: &str) -> Result<TxOutcome, WalletError> {
        let url = format!("{}/transaction/{}", self.base_url, transaction_id);
        for attempt in 1..=self.max_polls {
            let value: Value = self.client.get(&url).send().await?.json().await?;
            match value["transactionStatus"].as_str() {
                Some("mined") => return Ok(TxOutcome::Confirmed),
                Some("failed") => {
                    let code = value["errorCode"].as_str().unwrap_or("reverted");
                    return Ok(TxOutcome::Failed(code.to_string()));
                }
                Some("pending") if attempt < self.max_polls => {
                    tokio::time::sleep(self.poll_interval).await
                }
                Some("pending") => break,
                _ => return Err(WalletError::InvalidResponse(value.to_string())),
            }
        }
        Err(WalletError::StillPending(transaction_id.to_string()))
    }
}
