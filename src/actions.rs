// User-initiated escrow calls
//
// Every call is validated against the current model before anything is sent
// to the wallet. Submission results are reported as transaction status text.

use chrono::Utc;
use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::abi::{self, ContractCall};
use crate::attestation::to_claim_args;
use crate::error::{ActionError, WalletError};
use crate::models::{DepositRequest, TxSubmitted};
use crate::refresh::{Model, RefreshHandle, Trigger};
use crate::wallet::{TxOutcome, WalletCapability};

pub const TOKEN_DECIMALS: u32 = 18;

/// Parse a user-entered decimal token amount into base units
pub fn parse_amount(raw: &str, field: &str) -> Result<U256, ActionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ActionError::validation(format!("{} is required", field)));
    }
    if raw.starts_with('-') {
        return Err(ActionError::validation(format!("{} must be positive", field)));
    }
    let amount: U256 = parse_units(raw, TOKEN_DECIMALS)
        .map_err(|_| ActionError::validation(format!("{} is not a valid amount", field)))?
        .into();
    if amount.is_zero() {
        return Err(ActionError::validation(format!("{} must be greater than zero", field)));
    }
    Ok(amount)
}

pub struct EscrowActions {
    escrow: Address,
    wallet: Arc<dyn WalletCapability>,
    refresh: RefreshHandle,
}

impl EscrowActions {
    pub fn new(escrow: Address, wallet: Arc<dyn WalletCapability>, refresh: RefreshHandle) -> Self {
        Self {
            escrow,
            wallet,
            refresh,
        }
    }

    fn signed_in(&self) -> Result<(Address, Model), ActionError> {
        let model = self.refresh.model();
        let identity = model
            .active_identity(Utc::now())
            .ok_or(ActionError::NotAuthenticated)?;
        Ok((identity, model))
    }

    pub async fn signal_intent(
        &self,
        deposit_id: u64,
        amount: &str,
    ) -> Result<TxSubmitted, ActionError> {
        let (_, model) = self.signed_in()?;
        if !model.intent.state().can_signal_intent() {
            return Err(ActionError::validation(
                "An unclaimed intent already exists; cancel or claim it first",
            ));
        }
        let deposit = model
            .snapshot
            .available_deposits()
            .into_iter()
            .find(|d| d.id == deposit_id)
            .cloned()
            .ok_or_else(|| {
                ActionError::validation(format!("Deposit {} is not available", deposit_id))
            })?;

        let amount = parse_amount(amount, "Amount")?;
        if amount < deposit.minimum_amount {
            return Err(ActionError::validation(
                "Amount is below the deposit's minimum",
            ));
        }
        if amount > deposit.remaining_amount {
            return Err(ActionError::validation(
                "Amount exceeds the deposit's remaining funds",
            ));
        }

        let id = self
            .send(abi::signal_intent(self.escrow, deposit_id, amount))
            .await?;
        self.watch_result(id.clone(), false);
        Ok(TxSubmitted { transaction_id: id })
    }

    pub async fn cancel_intent(&self) -> Result<TxSubmitted, ActionError> {
        let (_, model) = self.signed_in()?;
        if !model.intent.state().is_active() {
            return Err(ActionError::validation("No active intent to cancel"));
        }

        let id = self.send(abi::cancel_intent(self.escrow)).await?;
        self.watch_result(id.clone(), false);
        Ok(TxSubmitted { transaction_id: id })
    }

    /// Submit the claim and optimistically show the intent as claimed
    pub async fn claim_funds(&self, proof: &Value) -> Result<TxSubmitted, ActionError> {
        let (_, model) = self.signed_in()?;
        if !model.intent.state().is_active() {
            return Err(ActionError::validation("No active intent to claim"));
        }
        let (input, signature) = to_claim_args(proof)?;

        let id = self
            .send(abi::claim_funds(self.escrow, &input, &signature))
            .await?;
        if !self.refresh.mark_claimed().await {
            warn!("Intent changed before the claim could be marked");
        }
        self.watch_result(id.clone(), true);
        Ok(TxSubmitted { transaction_id: id })
    }

    pub async fn deposit_funds(&self, request: &DepositRequest) -> Result<TxSubmitted, ActionError> {
        self.signed_in()?;
        let payment_id = request.payment_id.trim();
        if payment_id.is_empty() {
            return Err(ActionError::validation("UPI ID is required"));
        }
        let amount = parse_amount(&request.amount, "Amount")?;
        let minimum = parse_amount(&request.minimum_amount, "Minimum amount")?;
        if minimum > amount {
            return Err(ActionError::validation(
                "Minimum amount cannot exceed the deposit amount",
            ));
        }
        if request.permit.amount != amount {
            return Err(ActionError::validation(
                "Transfer permit does not cover the deposit amount",
            ));
        }

        let call = abi::deposit_funds(self.escrow, payment_id, amount, minimum, &request.permit);
        let id = self.send(call).await?;
        self.watch_result(id.clone(), false);
        Ok(TxSubmitted { transaction_id: id })
    }

    pub async fn withdraw_remaining(&self, deposit_id: u64) -> Result<TxSubmitted, ActionError> {
        let (identity, model) = self.signed_in()?;
        let owned = model
            .snapshot
            .seller_deposits(identity)
            .into_iter()
            .find(|d| d.id == deposit_id)
            .cloned()
            .ok_or_else(|| {
                ActionError::validation(format!("Deposit {} is not yours", deposit_id))
            })?;
        if owned.is_exhausted() {
            return Err(ActionError::validation("Nothing left to withdraw"));
        }

        let id = self
            .send(abi::withdraw_remaining_funds(self.escrow, deposit_id))
            .await?;
        self.watch_result(id.clone(), false);
        Ok(TxSubmitted { transaction_id: id })
    }

    async fn send(&self, call: ContractCall) -> Result<String, ActionError> {
        match self.wallet.submit_transaction(&call).await {
            Ok(id) => {
                info!("{} submitted as {}", call.function, id);
                self.refresh.set_tx_status(format!("Transaction sent! ID: {}", id));
                Ok(id)
            }
            Err(e) => {
                let err = ActionError::from(e);
                warn!("{} rejected: {}", call.function, err);
                self.refresh.set_tx_status(err.to_string());
                Err(err)
            }
        }
    }

    /// Follow the transaction to a final state; confirmation refreshes the model.
    ///
    /// A claim that does not confirm loses its optimistic `Claimed` state and
    /// the intent is re-read, so the claim can be retried.
    fn watch_result(&self, transaction_id: String, optimistic_claim: bool) {
        let wallet = self.wallet.clone();
        let refresh = self.refresh.clone();
        tokio::spawn(async move {
            let status = match wallet.subscribe_to_result(&transaction_id).await {
                Ok(TxOutcome::Confirmed) => {
                    info!("Transaction {} confirmed", transaction_id);
                    refresh.set_tx_status("Transaction confirmed");
                    refresh.trigger(Trigger::TxConfirmed);
                    return;
                }
                Ok(TxOutcome::Failed(code)) => {
                    warn!("Transaction {} failed: {}", transaction_id, code);
                    format!("Transaction failed: {}", code)
                }
                Err(WalletError::StillPending(id)) => {
                    warn!("Transaction {} still pending, no longer watching", id);
                    format!("Transaction still pending: {}", id)
                }
                Err(e) => {
                    warn!("Lost track of transaction {}: {}", transaction_id, e);
                    format!("Transaction failed: {}", e)
                }
            };
            if optimistic_claim {
                refresh.rollback_claim();
                refresh.trigger(Trigger::TxConfirmed);
            }
            refresh.set_tx_status(status);
        });
    }
}
