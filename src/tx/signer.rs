//! Typed transaction construction and local EIP-155 signing

use super::request::{parse_address, NormalizedTransaction, TxType};
use crate::error::{LoadResult, LoadTestError};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;

/// Build the ethers transaction for a normalized request.
///
/// `sender` fills `from` when the request does not name one. `chain_id` is
/// always the client's, the request's own chain id is ignored.
pub fn build_typed_transaction(
    tx: &NormalizedTransaction,
    sender: Option<Address>,
    chain_id: u64,
) -> LoadResult<TypedTransaction> {
    if tx.value < 0 {
        return Err(LoadTestError::InvalidTransaction(format!(
            "negative value {}",
            tx.value
        )));
    }
    let value = U256::from(tx.value as u64);

    let from = match &tx.from {
        Some(from) => Some(parse_address(from)?),
        None => sender,
    };
    let to = tx.to.as_deref().map(parse_address).transpose()?;
    let data = Bytes::from(tx.input.clone());

    let typed = match tx.tx_type {
        TxType::Legacy => {
            let mut req = TransactionRequest::new()
                .value(value)
                .data(data)
                .gas(tx.gas)
                .gas_price(tx.gas_price)
                .nonce(tx.nonce)
                .chain_id(chain_id);
            if let Some(to) = to {
                req = req.to(to);
            }
            if let Some(from) = from {
                req = req.from(from);
            }
            TypedTransaction::Legacy(req)
        }
        TxType::DynamicFee => {
            let mut req = Eip1559TransactionRequest::new()
                .value(value)
                .data(data)
                .gas(tx.gas)
                .max_fee_per_gas(tx.gas_fee_cap)
                .max_priority_fee_per_gas(tx.gas_tip_cap)
                .nonce(tx.nonce)
                .chain_id(chain_id);
            if let Some(to) = to {
                req = req.to(to);
            }
            if let Some(from) = from {
                req = req.from(from);
            }
            TypedTransaction::Eip1559(req)
        }
    };

    Ok(typed)
}

/// Sign with the local wallet and return the RLP encoding ready for
/// `eth_sendRawTransaction`
pub async fn sign_transaction(wallet: &LocalWallet, tx: &TypedTransaction) -> LoadResult<Bytes> {
    let signature = wallet
        .sign_transaction(tx)
        .await
        .map_err(|e| LoadTestError::Wallet(e.to_string()))?;
    Ok(tx.rlp_signed(&signature))
}
