use clap::Parser;
use std::path::PathBuf;
use bitcoin::Network as BitcoinNetwork;
use crate::error::BridgeError;

/// ノードの署名リクエストをリモート署名サービスへ中継する。
/// リクエストは標準入力から1行ずつ JSON で受け取り、応答を標準出力へ書き出す。
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// 設定ファイル (JSON) へのパス
    #[clap(short, long, value_parser)]
    pub config: Option<PathBuf>,

    /// リモート署名サービスのアドレス (例: 127.0.0.1:50051)
    #[clap(short, long, value_parser)]
    pub signer_addr: Option<String>,

    /// 使用するネットワーク ("bitcoin", "testnet", "signet", "regtest")
    #[clap(short, long, value_parser)]
    pub network: Option<String>,

    /// リモート呼び出しのタイムアウト秒数
    #[clap(short, long, value_parser)]
    pub timeout_secs: Option<u64>,
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, BridgeError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "signet" => Ok(BitcoinNetwork::Signet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(BridgeError::InputValidation(format!("無効なネットワークが指定されました: {}", s))),
    }
}
