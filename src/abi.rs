// ABI definitions for the escrow contract
//
// Read calls, mutating calls and the five event layouts. All event fields are
// non-indexed, so every payload decodes from log data alone.

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};

use crate::attestation::{AttestationInput, AttestationSignature};
use crate::error::LedgerError;
use crate::models::{BuyerIntent, Deposit, EventKind, EventPayload, TransferPermit};

// ============================================================================
// FUNCTION SIGNATURES
// ============================================================================

pub const DEPOSIT_COUNTER: &str = "depositCounter()";
pub const DEPOSITS: &str = "deposits(uint256)";
pub const BUYER_INTENTS: &str = "buyerIntents(address)";
pub const SIGNAL_INTENT: &str = "signalIntent(uint256,uint256)";
pub const CANCEL_INTENT: &str = "cancelIntent()";
pub const WITHDRAW_REMAINING_FUNDS: &str = "withdrawRemainingFunds(uint256)";
pub const DEPOSIT_FUNDS: &str =
    "depositFunds(string,uint256,uint256,((address,uint256),uint256,uint256),(address,uint256),bytes)";
pub const CLAIM_FUNDS: &str = "claimFunds((string,string,string,string,string,(string,string)[]),(bytes32,uint8,bytes32,bytes32,address))";

/// Pre-encoded call handed to the wallet for signing and submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub to: Address,
    pub function: &'static str,
    pub data: Bytes,
}

fn calldata(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(abi::encode(args));
    data.into()
}

pub fn encode_deposit_counter() -> Bytes {
    calldata(DEPOSIT_COUNTER, &[])
}

pub fn encode_deposits(deposit_id: u64) -> Bytes {
    calldata(DEPOSITS, &[Token::Uint(U256::from(deposit_id))])
}

pub fn encode_buyer_intents(buyer: Address) -> Bytes {
    calldata(BUYER_INTENTS, &[Token::Address(buyer)])
}

pub fn signal_intent(escrow: Address, deposit_id: u64, amount: U256) -> ContractCall {
    ContractCall {
        to: escrow,
        function: "signalIntent",
        data: calldata(
            SIGNAL_INTENT,
            &[Token::Uint(U256::from(deposit_id)), Token::Uint(amount)],
        ),
    }
}

pub fn cancel_intent(escrow: Address) -> ContractCall {
    ContractCall {
        to: escrow,
        function: "cancelIntent",
        data: calldata(CANCEL_INTENT, &[]),
    }
}

pub fn withdraw_remaining_funds(escrow: Address, deposit_id: u64) -> ContractCall {
    ContractCall {
        to: escrow,
        function: "withdrawRemainingFunds",
        data: calldata(WITHDRAW_REMAINING_FUNDS, &[Token::Uint(U256::from(deposit_id))]),
    }
}

pub fn deposit_funds(
    escrow: Address,
    payment_id: &str,
    amount: U256,
    minimum_amount: U256,
    permit: &TransferPermit,
) -> ContractCall {
    let permit_transfer_from = Token::Tuple(vec![
        Token::Tuple(vec![Token::Address(permit.token), Token::Uint(permit.amount)]),
        Token::Uint(permit.nonce),
        Token::Uint(permit.deadline),
    ]);
    let transfer_details = Token::Tuple(vec![Token::Address(escrow), Token::Uint(amount)]);
    ContractCall {
        to: escrow,
        function: "depositFunds",
        data: calldata(
            DEPOSIT_FUNDS,
            &[
                Token::String(payment_id.to_string()),
                Token::Uint(amount),
                Token::Uint(minimum_amount),
                permit_transfer_from,
                transfer_details,
                Token::Bytes(permit.signature.to_vec()),
            ],
        ),
    }
}

pub fn claim_funds(
    escrow: Address,
    input: &AttestationInput,
    signature: &AttestationSignature,
) -> ContractCall {
    let data = input
        .data
        .iter()
        .map(|(k, v)| Token::Tuple(vec![Token::String(k.clone()), Token::String(v.clone())]))
        .collect();
    let input_token = Token::Tuple(vec![
        Token::String(input.version.clone()),
        Token::String(input.script_raw.clone()),
        Token::String(input.issued_at.clone()),
        Token::String(input.nonce.clone()),
        Token::String(input.session_id.clone()),
        Token::Array(data),
    ]);
    let signature_token = Token::Tuple(vec![
        Token::FixedBytes(signature.digest.as_bytes().to_vec()),
        Token::Uint(U256::from(signature.v)),
        Token::FixedBytes(signature.r.as_bytes().to_vec()),
        Token::FixedBytes(signature.s.as_bytes().to_vec()),
        Token::Address(signature.expected_signer),
    ]);
    ContractCall {
        to: escrow,
        function: "claimFunds",
        data: calldata(CLAIM_FUNDS, &[input_token, signature_token]),
    }
}

// ============================================================================
// RETURN DECODING
// ============================================================================

fn decode(context: &str, types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, LedgerError> {
    abi::decode(types, data).map_err(|e| LedgerError::decode(context, e))
}

fn take_uint(tokens: &mut impl Iterator<Item = Token>, context: &str) -> Result<U256, LedgerError> {
    tokens
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| LedgerError::decode(context, "expected uint"))
}

fn take_address(
    tokens: &mut impl Iterator<Item = Token>,
    context: &str,
) -> Result<Address, LedgerError> {
    tokens
        .next()
        .and_then(Token::into_address)
        .ok_or_else(|| LedgerError::decode(context, "expected address"))
}

fn take_string(
    tokens: &mut impl Iterator<Item = Token>,
    context: &str,
) -> Result<String, LedgerError> {
    tokens
        .next()
        .and_then(Token::into_string)
        .ok_or_else(|| LedgerError::decode(context, "expected string"))
}

fn to_u64(value: U256, context: &str) -> Result<u64, LedgerError> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::decode(context, "identifier exceeds u64"));
    }
    Ok(value.as_u64())
}

pub fn decode_deposit_counter(data: &[u8]) -> Result<u64, LedgerError> {
    let mut tokens = decode(DEPOSIT_COUNTER, &[ParamType::Uint(256)], data)?.into_iter();
    to_u64(take_uint(&mut tokens, DEPOSIT_COUNTER)?, DEPOSIT_COUNTER)
}

pub fn decode_deposit(deposit_id: u64, data: &[u8]) -> Result<Deposit, LedgerError> {
    let types = [
        ParamType::Address,
        ParamType::String,
        ParamType::Uint(256),
        ParamType::Uint(256),
    ];
    let mut tokens = decode(DEPOSITS, &types, data)?.into_iter();
    Ok(Deposit {
        id: deposit_id,
        seller: take_address(&mut tokens, DEPOSITS)?,
        payment_id: take_string(&mut tokens, DEPOSITS)?,
        remaining_amount: take_uint(&mut tokens, DEPOSITS)?,
        minimum_amount: take_uint(&mut tokens, DEPOSITS)?,
    })
}

pub fn decode_buyer_intent(data: &[u8]) -> Result<BuyerIntent, LedgerError> {
    let types = [
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::Bool,
        ParamType::Uint(256),
    ];
    let mut tokens = decode(BUYER_INTENTS, &types, data)?.into_iter();
    let buyer = take_address(&mut tokens, BUYER_INTENTS)?;
    let amount = take_uint(&mut tokens, BUYER_INTENTS)?;
    let timestamp = take_uint(&mut tokens, BUYER_INTENTS)?;
    let claimed = tokens
        .next()
        .and_then(Token::into_bool)
        .ok_or_else(|| LedgerError::decode(BUYER_INTENTS, "expected bool"))?;
    let deposit_id = to_u64(take_uint(&mut tokens, BUYER_INTENTS)?, BUYER_INTENTS)?;
    Ok(BuyerIntent {
        buyer,
        amount,
        timestamp,
        claimed,
        deposit_id,
    })
}

// ============================================================================
// EVENTS
// ============================================================================

pub fn event_signature(kind: EventKind) -> &'static str {
    match kind {
        EventKind::FundsDeposited => "FundsDeposited(uint256,address,string,uint256,uint256)",
        EventKind::BuyerIntent => "BuyerIntent(uint256,address,uint256)",
        EventKind::IntentCancelled => "IntentCancelled(address,uint256)",
        EventKind::PaymentClaimed => "PaymentClaimed(address,uint256,string)",
        EventKind::FundsWithdrawn => "FundsWithdrawn(address,uint256,uint256)",
    }
}

/// topic0 used to filter logs of one kind
pub fn event_topic(kind: EventKind) -> H256 {
    H256::from(keccak256(event_signature(kind).as_bytes()))
}

fn event_params(kind: EventKind) -> Vec<ParamType> {
    match kind {
        EventKind::FundsDeposited => vec![
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::String,
            ParamType::Uint(256),
            ParamType::Uint(256),
        ],
        EventKind::BuyerIntent => {
            vec![ParamType::Uint(256), ParamType::Address, ParamType::Uint(256)]
        }
        EventKind::IntentCancelled => vec![ParamType::Address, ParamType::Uint(256)],
        EventKind::PaymentClaimed => {
            vec![ParamType::Address, ParamType::Uint(256), ParamType::String]
        }
        EventKind::FundsWithdrawn => {
            vec![ParamType::Address, ParamType::Uint(256), ParamType::Uint(256)]
        }
    }
}

/// Decode the data section of a log of a known kind
pub fn decode_event(kind: EventKind, data: &[u8]) -> Result<EventPayload, LedgerError> {
    let ctx = kind.as_str();
    let mut t = decode(ctx, &event_params(kind), data)?.into_iter();
    let payload = match kind {
        EventKind::FundsDeposited => EventPayload::FundsDeposited {
            deposit_id: take_uint(&mut t, ctx)?,
            seller: take_address(&mut t, ctx)?,
            payment_id: take_string(&mut t, ctx)?,
            remaining_amount: take_uint(&mut t, ctx)?,
            minimum_amount: take_uint(&mut t, ctx)?,
        },
        EventKind::BuyerIntent => EventPayload::BuyerIntent {
            deposit_id: take_uint(&mut t, ctx)?,
            buyer: take_address(&mut t, ctx)?,
            amount: take_uint(&mut t, ctx)?,
        },
        EventKind::IntentCancelled => EventPayload::IntentCancelled {
            buyer: take_address(&mut t, ctx)?,
            deposit_id: take_uint(&mut t, ctx)?,
        },
        EventKind::PaymentClaimed => EventPayload::PaymentClaimed {
            buyer: take_address(&mut t, ctx)?,
            amount: take_uint(&mut t, ctx)?,
            payment_transaction_id: take_string(&mut t, ctx)?,
        },
        EventKind::FundsWithdrawn => EventPayload::FundsWithdrawn {
            seller: take_address(&mut t, ctx)?,
            deposit_id: take_uint(&mut t, ctx)?,
            amount: take_uint(&mut t, ctx)?,
        },
    };
    Ok(payload)
}
