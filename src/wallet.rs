//! Signing keys: loading from options and generating throwaway accounts

use crate::config::{ClientOptions, KeySource};
use crate::error::{LoadResult, LoadTestError};

use ethers::core::rand::thread_rng;
use ethers::signers::{coins_bip39::English, LocalWallet, MnemonicBuilder, Signer};
use serde::{Deserialize, Serialize};

/// A freshly generated account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Hex encoded secret, no 0x prefix
    pub private_key: String,
    pub address: String,
}

/// Create a random key
pub fn generate_key() -> Key {
    let wallet = LocalWallet::new(&mut thread_rng());
    Key {
        private_key: hex::encode(wallet.signer().to_bytes()),
        address: format!("{:?}", wallet.address()),
    }
}

/// Build the signer the options describe
pub fn load_signer(options: &ClientOptions) -> LoadResult<LocalWallet> {
    match options.key_source() {
        KeySource::Mnemonic(phrase) => MnemonicBuilder::<English>::default()
            .phrase(phrase)
            .build()
            .map_err(|e| LoadTestError::InvalidConfig(format!("invalid mnemonic: {}", e))),
        KeySource::PrivateKey(key) => key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| LoadTestError::InvalidConfig(format!("invalid private key: {}", e))),
    }
}
