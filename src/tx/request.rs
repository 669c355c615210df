//! Transaction normalization
//!
//! Scripts hand over partially filled requests. Normalization fills the gas
//! limit and picks exactly one fee scheme so the signer never has to guess.

use crate::error::{LoadResult, LoadTestError};

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Gas limit of a bare value transfer
pub const DEFAULT_GAS_LIMIT: u64 = 21_000;

/// Legacy gas price used when a request names no fee at all
pub const FALLBACK_GAS_PRICE: u64 = 5_242_880;

/// User supplied, possibly incomplete transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionRequest {
    pub from: Option<String>,
    /// `None` creates a contract
    pub to: Option<String>,
    /// Wei; negative values are rejected by [`TransactionRequest::validate`]
    pub value: i64,
    #[serde(with = "hex_bytes")]
    pub input: Vec<u8>,
    /// Gas limit, 0 means unset
    pub gas: u64,
    pub gas_price: u64,
    pub gas_fee_cap: u64,
    pub gas_tip_cap: u64,
    pub nonce: u64,
    /// Informational only, the client's chain id is used for signing
    pub chain_id: Option<u64>,
}

/// How a normalized transaction will be submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// `eth_sendTransaction`, the node signs for `from`
    NodeSigned,
    /// Signed locally; the signing key is the sender
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxType {
    Legacy,
    DynamicFee,
}

/// Fully specified transaction ready for signing
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTransaction {
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: i64,
    pub input: Vec<u8>,
    pub gas: u64,
    pub gas_price: u64,
    pub gas_fee_cap: u64,
    pub gas_tip_cap: u64,
    pub nonce: u64,
    pub chain_id: Option<u64>,
    pub tx_type: TxType,
}

impl TransactionRequest {
    /// Plain value transfer
    pub fn transfer(to: &str, value: i64) -> Self {
        Self {
            to: Some(to.to_string()),
            value,
            ..Default::default()
        }
    }

    /// Reject requests the signer could not represent
    pub fn validate(&self) -> LoadResult<()> {
        if self.value < 0 {
            return Err(LoadTestError::InvalidTransaction(format!(
                "negative value {}",
                self.value
            )));
        }
        if let Some(from) = &self.from {
            parse_address(from)?;
        }
        if let Some(to) = &self.to {
            parse_address(to)?;
        }
        Ok(())
    }
}

/// Fill defaults and select the fee scheme.
///
/// A non-zero fee cap or tip cap always wins over a legacy gas price, which
/// is then dropped.
pub fn normalize(req: TransactionRequest, mode: SendMode) -> NormalizedTransaction {
    let gas = if req.gas == 0 { DEFAULT_GAS_LIMIT } else { req.gas };

    let (tx_type, gas_price) = if req.gas_fee_cap > 0 || req.gas_tip_cap > 0 {
        (TxType::DynamicFee, 0)
    } else if req.gas_price == 0 {
        (TxType::Legacy, FALLBACK_GAS_PRICE)
    } else {
        (TxType::Legacy, req.gas_price)
    };

    let from = match mode {
        SendMode::NodeSigned => req.from,
        SendMode::Raw => None,
    };

    NormalizedTransaction {
        from,
        to: req.to,
        value: req.value,
        input: req.input,
        gas,
        gas_price,
        gas_fee_cap: req.gas_fee_cap,
        gas_tip_cap: req.gas_tip_cap,
        nonce: req.nonce,
        chain_id: req.chain_id,
        tx_type,
    }
}

/// Parse a 20-byte hex address, with or without 0x
pub fn parse_address(value: &str) -> LoadResult<Address> {
    Address::from_str(value.trim())
        .map_err(|e| LoadTestError::InvalidTransaction(format!("invalid address {}: {}", value, e)))
}

/// Decode hex, tolerating a 0x prefix
pub fn decode_hex(value: &str) -> LoadResult<Vec<u8>> {
    let trimmed = value.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    hex::decode(stripped).map_err(|e| LoadTestError::Encoding(format!("invalid hex: {}", e)))
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TO: &str = "0xDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF";

    #[test]
    fn test_dynamic_fee_wins_over_legacy_price() {
        for (fee_cap, tip_cap) in [(10, 0), (0, 2), (30, 2)] {
            let req = TransactionRequest {
                gas_price: 999,
                gas_fee_cap: fee_cap,
                gas_tip_cap: tip_cap,
                ..TransactionRequest::transfer(TO, 1)
            };
            let tx = normalize(req, SendMode::Raw);
            assert_eq!(tx.tx_type, TxType::DynamicFee);
            assert_eq!(tx.gas_price, 0);
            assert_eq!(tx.gas_fee_cap, fee_cap);
            assert_eq!(tx.gas_tip_cap, tip_cap);
        }
    }

    #[test]
    fn test_default_gas_limit() {
        let tx = normalize(TransactionRequest::transfer(TO, 0), SendMode::NodeSigned);
        assert_eq!(tx.gas, DEFAULT_GAS_LIMIT);

        let req = TransactionRequest {
            gas: 50_000,
            ..TransactionRequest::transfer(TO, 0)
        };
        assert_eq!(normalize(req, SendMode::NodeSigned).gas, 50_000);
    }

    #[test]
    fn test_fallback_gas_price() {
        let tx = normalize(TransactionRequest::transfer(TO, 0), SendMode::NodeSigned);
        assert_eq!(tx.tx_type, TxType::Legacy);
        assert_eq!(tx.gas_price, FALLBACK_GAS_PRICE);
    }

    #[test]
    fn test_explicit_legacy_price_kept() {
        let req = TransactionRequest {
            gas_price: 7,
            ..TransactionRequest::transfer(TO, 0)
        };
        let tx = normalize(req, SendMode::NodeSigned);
        assert_eq!(tx.tx_type, TxType::Legacy);
        assert_eq!(tx.gas_price, 7);
    }

    #[test]
    fn test_raw_mode_drops_from() {
        let req = TransactionRequest {
            from: Some("0x85da99c8a7c2c95964c8efd687e95e632fc533d6".into()),
            ..TransactionRequest::transfer(TO, 0)
        };
        assert!(normalize(req.clone(), SendMode::Raw).from.is_none());
        assert!(normalize(req, SendMode::NodeSigned).from.is_some());
    }

    #[test]
    fn test_validate_rejects_negative_value() {
        let err = TransactionRequest::transfer(TO, -1).validate().unwrap_err();
        assert!(matches!(err, LoadTestError::InvalidTransaction(_)));
        assert!(TransactionRequest::transfer(TO, 0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let err = TransactionRequest::transfer("0xnothex", 1).validate().unwrap_err();
        assert!(matches!(err, LoadTestError::InvalidTransaction(_)));
    }

    #[test]
    fn test_request_from_script_json() {
        let req: TransactionRequest = serde_json::from_value(serde_json::json!({
            "to": TO,
            "value": 1_000_000_000_000_000i64,
            "gas_price": 20,
            "nonce": 4,
            "input": "0xd09de08a"
        }))
        .unwrap();
        assert_eq!(req.nonce, 4);
        assert_eq!(req.input, vec![0xd0, 0x9d, 0xe0, 0x8a]);
        assert_eq!(req.gas, 0);
    }
}
