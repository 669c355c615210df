//! ABI-bound contract handle
//!
//! Arguments arrive as JSON values from scenario configuration and are
//! tokenized against the function's declared parameter types.

use crate::client::Client;
use crate::error::{LoadResult, LoadTestError};
use crate::tx::TransactionRequest;

use ethers::abi::token::{LenientTokenizer, Tokenizer};
use ethers::abi::{Abi, Function, Param, ParamType, Token};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, H256, I256};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Options for a state-changing contract call
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TxnOpts {
    pub value: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    /// Fetched from the node when unset
    pub nonce: Option<u64>,
}

#[derive(Clone)]
pub struct Contract {
    client: Client,
    address: Address,
    abi: Abi,
}

impl Contract {
    pub fn new(client: Client, address: Address, abi: Abi) -> Self {
        Self {
            client,
            address,
            abi,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    fn function(&self, method: &str) -> LoadResult<&Function> {
        self.abi
            .function(method)
            .map_err(|_| LoadTestError::Encoding(format!("method {} not found in abi", method)))
    }

    fn encode_call(&self, method: &str, args: &[Value]) -> LoadResult<(&Function, Vec<u8>)> {
        let function = self.function(method)?;
        let tokens = encode_args(&function.inputs, args)?;
        let data = function
            .encode_input(&tokens)
            .map_err(|e| LoadTestError::Encoding(format!("{}: {}", method, e)))?;
        Ok((function, data))
    }

    /// Read-only call; outputs keyed by name, or by position when unnamed
    pub async fn call(&self, method: &str, args: &[Value]) -> LoadResult<Map<String, Value>> {
        let (function, data) = self.encode_call(method, args)?;

        let request = ethers::types::TransactionRequest::new()
            .from(self.client.address())
            .to(self.address)
            .data(data);
        let output = self
            .client
            .eth_call(TypedTransaction::Legacy(request))
            .await?;

        let tokens = function
            .decode_output(&output)
            .map_err(|e| LoadTestError::Encoding(format!("{} output: {}", method, e)))?;

        Ok(function
            .outputs
            .iter()
            .zip(tokens)
            .enumerate()
            .map(|(i, (param, token))| {
                let key = if param.name.is_empty() {
                    i.to_string()
                } else {
                    param.name.clone()
                };
                (key, token_to_json(&token))
            })
            .collect())
    }

    /// Signed state-changing call, returns the transaction hash
    pub async fn txn(&self, method: &str, opts: TxnOpts, args: &[Value]) -> LoadResult<H256> {
        let (_, input) = self.encode_call(method, args)?;

        let value = i64::try_from(opts.value).map_err(|_| {
            LoadTestError::InvalidTransaction(format!("value {} out of range", opts.value))
        })?;
        let nonce = match opts.nonce {
            Some(nonce) => nonce,
            None => {
                self.client
                    .get_nonce(&format!("{:?}", self.client.address()))
                    .await?
            }
        };

        let mut req = TransactionRequest {
            to: Some(format!("{:?}", self.address)),
            value,
            input,
            gas: opts.gas_limit,
            gas_price: opts.gas_price,
            nonce,
            ..Default::default()
        };
        self.client.price_from_node(&mut req).await?;
        self.client.send_raw_transaction(req).await
    }
}

pub fn parse_abi(abi: &str) -> LoadResult<Abi> {
    serde_json::from_str(abi).map_err(|e| LoadTestError::Encoding(format!("invalid abi: {}", e)))
}

/// Tokenize JSON arguments against declared parameters
pub fn encode_args(params: &[Param], args: &[Value]) -> LoadResult<Vec<Token>> {
    if params.len() != args.len() {
        return Err(LoadTestError::Encoding(format!(
            "expected {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            LenientTokenizer::tokenize(&param.kind, &literal(&param.kind, arg)).map_err(|e| {
                LoadTestError::Encoding(format!("argument {} ({}): {}", param.name, param.kind, e))
            })
        })
        .collect()
}

fn literal(kind: &ParamType, value: &Value) -> String {
    match (kind, value) {
        (ParamType::Array(inner) | ParamType::FixedArray(inner, _), Value::Array(items)) => {
            let parts: Vec<String> = items.iter().map(|v| literal(inner, v)).collect();
            format!("[{}]", parts.join(","))
        }
        (ParamType::Tuple(kinds), Value::Array(items)) => {
            let parts: Vec<String> = kinds
                .iter()
                .zip(items)
                .map(|(k, v)| literal(k, v))
                .collect();
            format!("({})", parts.join(","))
        }
        (ParamType::Address | ParamType::Bytes | ParamType::FixedBytes(_), Value::String(s)) => {
            s.trim_start_matches("0x").to_string()
        }
        (_, Value::String(s)) => s.clone(),
        (_, other) => other.to_string(),
    }
}

/// Decoded ABI value as JSON. Integers become decimal strings.
pub fn token_to_json(token: &Token) -> Value {
    match token {
        Token::Address(a) => Value::String(format!("{:?}", a)),
        Token::FixedBytes(b) | Token::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        Token::Uint(u) => Value::String(u.to_string()),
        Token::Int(i) => Value::String(I256::from_raw(*i).to_string()),
        Token::Bool(b) => Value::Bool(*b),
        Token::String(s) => Value::String(s.clone()),
        Token::FixedArray(items) | Token::Array(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(token_to_json).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;
    use crate::client::tests::{base_chain, client_over, signed_gas_price};
    use crate::metrics::testing::RecordingSink;
    use ethers::types::{Bytes, U256};
    use serde_json::json;
    use std::sync::Arc;

    const ABI: &str = r#"[
        {"type":"function","name":"balanceOf","stateMutability":"view",
         "inputs":[{"name":"owner","type":"address"}],
         "outputs":[{"name":"balance","type":"uint256"}]},
        {"type":"function","name":"transfer","stateMutability":"nonpayable",
         "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],
         "outputs":[{"name":"","type":"bool"}]}
    ]"#;

    const OWNER: &str = "0x85da99c8a7c2c95964c8efd687e95e632fc533d6";

    async fn contract(chain: MockChainClient) -> Contract {
        let client = client_over(chain, Arc::new(RecordingSink::default())).await;
        client
            .new_contract("0x1111111111111111111111111111111111111111", ABI)
            .unwrap()
    }

    #[test]
    fn test_encode_args_by_type() {
        let abi = parse_abi(ABI).unwrap();
        let function = abi.function("transfer").unwrap();
        let tokens = encode_args(&function.inputs, &[json!(OWNER), json!("1000")]).unwrap();

        assert_eq!(tokens[0], Token::Address(OWNER.parse().unwrap()));
        assert_eq!(tokens[1], Token::Uint(U256::from(1000u64)));

        // numbers are accepted as well as strings
        let tokens = encode_args(&function.inputs, &[json!(OWNER), json!(7)]).unwrap();
        assert_eq!(tokens[1], Token::Uint(U256::from(7u64)));
    }

    #[test]
    fn test_encode_args_arity() {
        let abi = parse_abi(ABI).unwrap();
        let function = abi.function("transfer").unwrap();
        assert!(matches!(
            encode_args(&function.inputs, &[json!(OWNER)]),
            Err(LoadTestError::Encoding(_))
        ));
    }

    #[test]
    fn test_encode_array_arg() {
        let params = vec![Param {
            name: "ids".into(),
            kind: ParamType::Array(Box::new(ParamType::Uint(256))),
            internal_type: None,
        }];
        let tokens = encode_args(&params, &[json!([1, "2", 3])]).unwrap();
        assert_eq!(
            tokens[0],
            Token::Array(vec![
                Token::Uint(U256::from(1u64)),
                Token::Uint(U256::from(2u64)),
                Token::Uint(U256::from(3u64))
            ])
        );
    }

    #[test]
    fn test_token_to_json() {
        assert_eq!(token_to_json(&Token::Uint(U256::from(5u64))), json!("5"));
        assert_eq!(
            token_to_json(&Token::Int(I256::from(-3i64).into_raw())),
            json!("-3")
        );
        assert_eq!(token_to_json(&Token::Bytes(vec![0xab, 0xcd])), json!("0xabcd"));
        assert_eq!(
            token_to_json(&Token::Tuple(vec![Token::Bool(true), Token::String("x".into())])),
            json!([true, "x"])
        );
    }

    #[tokio::test]
    async fn test_call_decodes_named_outputs() {
        let mut chain = base_chain();
        chain.expect_call().times(1).returning(|_| {
            Ok(Bytes::from(ethers::abi::encode(&[Token::Uint(U256::from(77u64))])))
        });

        let contract = contract(chain).await;
        let out = contract.call("balanceOf", &[json!(OWNER)]).await.unwrap();
        assert_eq!(out.get("balance"), Some(&json!("77")));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let contract = contract(base_chain()).await;
        assert!(matches!(
            contract.call("mint", &[]).await,
            Err(LoadTestError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn test_txn_fetches_nonce_when_unset() {
        let mut chain = base_chain();
        chain.expect_get_nonce().times(1).returning(|_| Ok(4));
        chain
            .expect_gas_price()
            .times(1)
            .returning(|| Ok(U256::from(2_000_000_000u64)));
        chain
            .expect_send_raw_transaction()
            .times(1)
            .returning(|raw| {
                assert_eq!(signed_gas_price(&raw), U256::from(2_000_000_000u64));
                Ok(H256::repeat_byte(5))
            });

        let contract = contract(chain).await;
        let opts = TxnOpts {
            gas_limit: 60_000,
            ..Default::default()
        };
        let hash = contract
            .txn("transfer", opts, &[json!(OWNER), json!("1")])
            .await
            .unwrap();
        assert_eq!(hash, H256::repeat_byte(5));
    }

    #[tokio::test]
    async fn test_txn_with_explicit_nonce() {
        let mut chain = base_chain();
        chain.expect_get_nonce().never();
        chain.expect_gas_price().never();
        chain.expect_estimate_gas().returning(|_| Ok(50_000));
        chain
            .expect_send_raw_transaction()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(6)));

        let contract = contract(chain).await;
        let opts = TxnOpts {
            nonce: Some(9),
            gas_price: 1_000_000_000,
            ..Default::default()
        };
        assert!(contract
            .txn("transfer", opts, &[json!(OWNER), json!("1")])
            .await
            .is_ok());
    }
}
