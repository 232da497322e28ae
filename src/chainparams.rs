use bitcoin::blockdata::constants::ChainHash;
use bitcoin::Network as BitcoinNetwork;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

const BIP32_VER_MAIN: Bip32KeyVersion = Bip32KeyVersion {
    pubkey_version: 0x0488_B21E,
    privkey_version: 0x0488_ADE4,
};
const BIP32_VER_TEST: Bip32KeyVersion = Bip32KeyVersion {
    pubkey_version: 0x0435_87CF,
    privkey_version: 0x0435_8394,
};

// Bitcoin Coreのデフォルトダスト閾値
const DUST_LIMIT_SATS: u64 = 546;
// 2^24 - 1 sats (BOLT #2)
const MAX_FUNDING_SATS: u64 = (1 << 24) - 1;
const MAX_PAYMENT_MSATS: u64 = 0xFFFF_FFFF;
const CLI_MIN_SUPPORTED_VERSION: u32 = 150_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bip32KeyVersion {
    pub pubkey_version: u32,
    pub privkey_version: u32,
}

/// ネットワークごとの不変パラメータ。init 時に一度だけ構築される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParams {
    pub network_name: String,
    pub bip173_name: String,
    pub bip70_name: String,
    #[serde(with = "hex::serde")]
    pub genesis_blockhash: [u8; 32],
    pub rpc_port: u16,
    pub cli: String,
    #[serde(default)]
    pub cli_args: Option<String>,
    pub cli_min_supported_version: u32,
    pub dust_limit_sat: u64,
    pub max_funding_sat: u64,
    pub max_payment_msat: u64,
    pub when_lightning_became_cool: u32,
    pub p2pkh_version: u8,
    pub p2sh_version: u8,
    pub testnet: bool,
    pub bip32_key_version: Bip32KeyVersion,
    #[serde(default)]
    pub is_elements: bool,
    #[serde(default, with = "hex::serde")]
    pub fee_asset_tag: Vec<u8>,
}

impl ChainParams {
    pub fn for_network(network: BitcoinNetwork) -> Result<Self, BridgeError> {
        let (network_name, bip173_name, bip70_name, rpc_port, cli_args, became_cool) = match network {
            BitcoinNetwork::Bitcoin => ("bitcoin", "bc", "main", 8332, None, 504_500),
            BitcoinNetwork::Testnet => ("testnet", "tb", "test", 18332, Some("-testnet"), 1),
            BitcoinNetwork::Signet => ("signet", "tb", "signet", 38332, Some("-signet"), 1),
            BitcoinNetwork::Regtest => ("regtest", "bcrt", "regtest", 18443, Some("-regtest"), 1),
            other => {
                return Err(BridgeError::InputValidation(format!(
                    "未対応のネットワークです: {:?}",
                    other
                )));
            }
        };
        let testnet = network != BitcoinNetwork::Bitcoin;
        let (p2pkh_version, p2sh_version, bip32_key_version) = if testnet {
            (111, 196, BIP32_VER_TEST)
        } else {
            (0, 5, BIP32_VER_MAIN)
        };

        Ok(ChainParams {
            network_name: network_name.to_string(),
            bip173_name: bip173_name.to_string(),
            bip70_name: bip70_name.to_string(),
            genesis_blockhash: ChainHash::using_genesis_block_const(network).to_bytes(),
            rpc_port,
            cli: "bitcoin-cli".to_string(),
            cli_args: cli_args.map(str::to_string),
            cli_min_supported_version: CLI_MIN_SUPPORTED_VERSION,
            dust_limit_sat: DUST_LIMIT_SATS,
            max_funding_sat: MAX_FUNDING_SATS,
            max_payment_msat: MAX_PAYMENT_MSATS,
            when_lightning_became_cool: became_cool,
            p2pkh_version,
            p2sh_version,
            testnet,
            bip32_key_version,
            is_elements: false,
            fee_asset_tag: Vec::new(),
        })
    }
}
