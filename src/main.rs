use std::io;
use clap::Parser;

mod chainparams;
mod cli;
mod config;
mod descriptors;
mod dispatcher;
mod error;
mod protocol;
mod signer;
mod transaction;
mod types;

use cli::{CliArgs, parse_network};
use config::BridgeConfig;
use dispatcher::{Dispatcher, serve};
use error::BridgeError;
use signer::SignerClient;

fn main() -> Result<(), BridgeError> {
    // 標準出力は応答用なのでログは標準エラーへ出る
    env_logger::init();

    let args = CliArgs::parse();
    log::info!("ブリッジを開始します。引数: {:?}", args);

    let config = BridgeConfig::load(&args)?;
    log::debug!("設定: {:?}", config);

    let network = parse_network(&config.network)?;
    log::info!("指定されたネットワーク: {:?}", network);

    let client = SignerClient::connect(&config.signer_addr, config.timeout()).map_err(|e| {
        log::error!("リモート署名サービスへの接続に失敗しました: {}", e);
        e
    })?;
    let mut dispatcher = Dispatcher::new(client, &config)?;
    log::info!("リクエストの受付を開始します。");

    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(&mut dispatcher, stdin.lock(), stdout.lock())?;

    log::info!("処理が正常に完了しました。");
    Ok(())
}
