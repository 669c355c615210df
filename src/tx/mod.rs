//! Transaction preparation, signing, nonce allocation and receipt awaiting

mod nonce;
mod receipt;
mod request;
mod signer;

pub use nonce::NonceManager;
pub use receipt::{ReceiptAwaiter, ReceiptTask, RECEIPT_POLL_INTERVAL};
pub use request::{
    decode_hex, normalize, parse_address, NormalizedTransaction, SendMode, TransactionRequest,
    TxType, DEFAULT_GAS_LIMIT, FALLBACK_GAS_PRICE,
};
pub use signer::{build_typed_transaction, sign_transaction};
