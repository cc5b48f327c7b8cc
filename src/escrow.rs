// Read access to the escrow contract

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, Log, U64};
use serde_json::json;

use crate::abi;
use crate::error::LedgerError;
use crate::models::{BuyerIntent, Deposit, EventKind, RawLog};
use crate::rpc::JsonRpcClient;

/// Ledger reads used by the snapshot reader and the history aggregator
#[async_trait]
pub trait EscrowLedger: Send + Sync {
    async fn block_number(&self) -> Result<u64, LedgerError>;

    async fn deposit_count(&self) -> Result<u64, LedgerError>;

    async fn deposit(&self, deposit_id: u64) -> Result<Deposit, LedgerError>;

    async fn intent_of(&self, buyer: Address) -> Result<BuyerIntent, LedgerError>;

    async fn logs(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LedgerError>;
}

pub struct EscrowContract {
    rpc: JsonRpcClient,
    address: Address,
}

impl EscrowContract {
    pub fn new(rpc_url: String, address: Address) -> Self {
        Self {
            rpc: JsonRpcClient::new(rpc_url),
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn call(&self, data: Bytes) -> Result<Bytes, LedgerError> {
        self.rpc
            .request(
                "eth_call",
                json!([{ "to": self.address, "data": data }, "latest"]),
            )
            .await
    }
}

#[async_trait]
impl EscrowLedger for EscrowContract {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        let head: U64 = self.rpc.request("eth_blockNumber", json!([])).await?;
        Ok(head.as_u64())
    }

    async fn deposit_count(&self) -> Result<u64, LedgerError> {
        let data = self.call(abi::encode_deposit_counter()).await?;
        abi::decode_deposit_counter(&data)
    }

    async fn deposit(&self, deposit_id: u64) -> Result<Deposit, LedgerError> {
        let data = self.call(abi::encode_deposits(deposit_id)).await?;
        abi::decode_deposit(deposit_id, &data)
    }

    async fn intent_of(&self, buyer: Address) -> Result<BuyerIntent, LedgerError> {
        let data = self.call(abi::encode_buyer_intents(buyer)).await?;
        abi::decode_buyer_intent(&data)
    }

    async fn logs(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, LedgerError> {
        let filter = Filter::new()
            .address(self.address)
            .topic0(abi::event_topic(kind))
            .from_block(from_block)
            .to_block(to_block);
        let logs: Vec<Log> = self.rpc.request("eth_getLogs", json!([filter])).await?;

        logs.into_iter()
            .map(|log| {
                let block_number = log
                    .block_number
                    .ok_or_else(|| LedgerError::decode(kind.as_str(), "log without block number"))?
                    .as_u64();
                Ok(RawLog {
                    block_number,
                    tx_hash: log.transaction_hash.unwrap_or_default(),
                    log_index: log.log_index.map(|i| i.low_u64()),
                    data: log.data.to_vec(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::test_node::{handler, spawn, Handler};
    use ethers::abi::{encode, Token};
    use ethers::types::{H256, U256};
    use ethers::utils::id;
    use std::collections::HashMap;

    fn hex_data(tokens: &[Token]) -> serde_json::Value {
        json!(format!("0x{}", hex::encode(encode(tokens))))
    }

    #[tokio::test]
    async fn test_reads_counter_and_intent_over_rpc() {
        let buyer = Address::repeat_byte(0x0b);
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert(
            "eth_call",
            handler(move |params| {
                let data = params[0]["data"].as_str().unwrap_or_default();
                let selector = hex::encode(id(abi::DEPOSIT_COUNTER));
                if data.starts_with(&format!("0x{}", selector)) {
                    Ok(hex_data(&[Token::Uint(U256::from(3))]))
                } else {
                    Ok(hex_data(&[
                        Token::Address(buyer),
                        Token::Uint(U256::from(50)),
                        Token::Uint(U256::from(1_700_000_000u64)),
                        Token::Bool(false),
                        Token::Uint(U256::from(2)),
                    ]))
                }
            }),
        );
        let contract = EscrowContract::new(spawn(handlers).await, Address::repeat_byte(0xee));

        assert_eq!(contract.deposit_count().await.unwrap(), 3);
        let intent = contract.intent_of(buyer).await.unwrap();
        assert_eq!(intent.amount, U256::from(50));
        assert_eq!(intent.deposit_id, 2);
        assert!(!intent.claimed);
    }

    #[tokio::test]
    async fn test_logs_are_filtered_by_topic() {
        let expected_topic = abi::event_topic(EventKind::IntentCancelled);
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert(
            "eth_getLogs",
            handler(move |params| {
                let topic = params[0]["topics"][0].as_str().unwrap_or_default();
                assert_eq!(topic, format!("{:?}", expected_topic));
                assert_eq!(params[0]["fromBlock"], "0x64");
                Ok(json!([{
                    "address": "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
                    "topics": [format!("{:?}", expected_topic)],
                    "data": "0x",
                    "blockNumber": "0x65",
                    "transactionHash": format!("{:?}", H256::repeat_byte(9)),
                    "logIndex": "0x2"
                }]))
            }),
        );
        let contract = EscrowContract::new(spawn(handlers).await, Address::repeat_byte(0xee));

        let logs = contract
            .logs(EventKind::IntentCancelled, 100, 200)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, 101);
        assert_eq!(logs[0].log_index, Some(2));
        assert_eq!(logs[0].tx_hash, H256::repeat_byte(9));
    }
}
