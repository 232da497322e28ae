use std::fs;
use std::path::Path;
use std::time::Duration;
use serde::Deserialize;

use crate::cli::CliArgs;
use crate::error::BridgeError;

fn default_signer_addr() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_network() -> String {
    "testnet".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    #[serde(default = "default_signer_addr")]
    pub signer_addr: String,
    #[serde(default = "default_network")]
    pub network: String, // "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 分類されていないコミットメント記述子をそのまま転送するか
    #[serde(default)]
    pub forward_unclassified_commitments: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            signer_addr: default_signer_addr(),
            network: default_network(),
            timeout_secs: default_timeout_secs(),
            forward_unclassified_commitments: false,
        }
    }
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path).map_err(|e| {
            log::error!("設定ファイルの読み込みに失敗しました: {:?}", path);
            BridgeError::Io(e)
        })?;
        serde_json::from_str(&content).map_err(|e| BridgeError::Config {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// 設定ファイル (任意) を読み込み、CLI 引数で上書きする
    pub fn load(args: &CliArgs) -> Result<Self, BridgeError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(addr) = &args.signer_addr {
            config.signer_addr = addr.clone();
        }
        if let Some(network) = &args.network {
            config.network = network.clone();
        }
        if let Some(secs) = args.timeout_secs {
            config.timeout_secs = secs;
        }
        if config.timeout_secs == 0 {
            return Err(BridgeError::InputValidation("timeoutSecs は 1 以上である必要があります".to_string()));
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
