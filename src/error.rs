use std::path::PathBuf;
use bitcoin::consensus::encode::Error as BitcoinEncodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// リモート署名サービスが返すステータスコード
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCode {
    InvalidArgument,
    Internal,
    Unavailable,
    DeadlineExceeded,
}

impl std::fmt::Display for RemoteCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RemoteCode::InvalidArgument => "invalid_argument",
            RemoteCode::Internal => "internal",
            RemoteCode::Unavailable => "unavailable",
            RemoteCode::DeadlineExceeded => "deadline_exceeded",
        };
        f.write_str(s)
    }
}

/// 署名対象トランザクションと意図した内容の不一致。
/// 回復せず、そのリクエストを中断する。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("入力数 {inputs} と UTXO 数 {utxos} が一致しません")]
    UtxoCountMismatch { inputs: usize, utxos: usize },

    #[error("入力 {input_index} は P2SH でラップされた UTXO です (未対応)")]
    ScriptHashInput { input_index: usize },

    #[error("おつり出力 {output_index} の金額 {actual} sats が期待値 {expected} sats と一致しません")]
    ChangeValueMismatch {
        output_index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("おつり出力が複数あります (出力 {first} と {second})")]
    MultipleChangeOutputs { first: usize, second: usize },

    #[error("外部出力はちょうど1つである必要があります (実際: {0})")]
    ExternalOutputCount(usize),

    #[error("送金先の script を持つ出力がトランザクションにありません")]
    TargetOutputMissing,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/Oエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bitcoinコンセンサスデコードエラー: {0}")]
    Decode(#[from] BitcoinEncodeError),

    #[error("16進数デコードエラー: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("設定ファイルの読み込みエラー ファイル: {path:?}, 詳細: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("入力検証エラー: {0}")]
    InputValidation(String),

    #[error("不変条件違反: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("未対応のリクエスト: {0}")]
    UnsupportedRequest(String),

    #[error("init 前にリクエストを受信しました")]
    NotInitialized,

    #[error("リモート署名サービスに接続できません: {0}")]
    Unavailable(String),

    #[error("リモート署名サービスの応答がタイムアウトしました")]
    Timeout,

    #[error("リモート署名サービスがリクエストを拒否しました ({code}): {message}")]
    Remote { code: RemoteCode, message: String },

    #[error("プロトコルエラー: {0}")]
    Protocol(String),
}

impl BridgeError {
    /// ノード向けエラー応答に載せる識別子
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Io(_) => "io",
            BridgeError::Json(_) => "json",
            BridgeError::Decode(_) => "decode",
            BridgeError::Hex(_) => "hex",
            BridgeError::Config { .. } => "config",
            BridgeError::InputValidation(_) => "input_validation",
            BridgeError::Invariant(_) => "invariant_violation",
            BridgeError::UnsupportedRequest(_) => "unsupported_request",
            BridgeError::NotInitialized => "not_initialized",
            BridgeError::Unavailable(_) => "unavailable",
            BridgeError::Timeout => "timeout",
            BridgeError::Remote { .. } => "remote",
            BridgeError::Protocol(_) => "protocol",
        }
    }
}
