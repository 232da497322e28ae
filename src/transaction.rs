use bitcoin::{
    absolute::LockTime, consensus::encode, transaction::Version, Amount, OutPoint, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

fn default_sequence() -> u32 {
    Sequence::MAX.0
}

/// ノードが送ってくる入力レコード
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputRecord {
    pub prev_txid: Txid,
    pub prev_index: u32,
    #[serde(default)]
    pub script_sig: ScriptBuf,
    #[serde(default = "default_sequence")]
    pub sequence: u32,
    #[serde(default, skip_serializing_if = "Witness::is_empty")]
    pub witness: Witness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputRecord {
    pub value_sat: u64,
    pub script_pubkey: ScriptBuf,
}

/// ノード側のトランザクション表現。入力・出力の順序はそのまま保持される。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTransaction {
    pub version: i32,
    pub inputs: Vec<TxInputRecord>,
    pub outputs: Vec<TxOutputRecord>,
    #[serde(default)]
    pub locktime: u32,
}

impl NodeTransaction {
    pub fn to_bitcoin(&self) -> Transaction {
        Transaction {
            version: Version(self.version),
            lock_time: LockTime::from_consensus(self.locktime),
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: OutPoint::new(input.prev_txid, input.prev_index),
                    script_sig: input.script_sig.clone(),
                    sequence: Sequence(input.sequence),
                    witness: input.witness.clone(),
                })
                .collect(),
            output: self
                .outputs
                .iter()
                .map(|output| TxOut {
                    value: Amount::from_sat(output.value_sat),
                    script_pubkey: output.script_pubkey.clone(),
                })
                .collect(),
        }
    }

    pub fn from_bitcoin(tx: Transaction) -> Self {
        NodeTransaction {
            version: tx.version.0,
            locktime: tx.lock_time.to_consensus_u32(),
            inputs: tx
                .input
                .into_iter()
                .map(|txin| TxInputRecord {
                    prev_txid: txin.previous_output.txid,
                    prev_index: txin.previous_output.vout,
                    script_sig: txin.script_sig,
                    sequence: txin.sequence.0,
                    witness: txin.witness,
                })
                .collect(),
            outputs: tx
                .output
                .into_iter()
                .map(|txout| TxOutputRecord {
                    value_sat: txout.value.to_sat(),
                    script_pubkey: txout.script_pubkey,
                })
                .collect(),
        }
    }
}

/// ノードはトランザクションをレコード形式か raw hex のどちらかで送る
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxPayload {
    Hex(String),
    Records(NodeTransaction),
}

impl TxPayload {
    pub fn into_transaction(self) -> Result<NodeTransaction, BridgeError> {
        match self {
            TxPayload::Hex(raw) => decode_tx_hex(&raw),
            TxPayload::Records(tx) => Ok(tx),
        }
    }
}

/// コンセンサス形式へシリアライズする。
/// witness を持つ入力がある場合 (または入力が空の場合) は BIP144 形式になる。
pub fn encode_tx(tx: &NodeTransaction) -> Vec<u8> {
    let bytes = encode::serialize(&tx.to_bitcoin());
    log::debug!(
        "トランザクションをエンコードしました: 入力 {} 件, 出力 {} 件, {} bytes",
        tx.inputs.len(),
        tx.outputs.len(),
        bytes.len()
    );
    bytes
}

/// 末尾に余分なバイトがある場合もエラーになる
pub fn decode_tx(bytes: &[u8]) -> Result<NodeTransaction, BridgeError> {
    let tx: Transaction = encode::deserialize(bytes)?;
    Ok(NodeTransaction::from_bitcoin(tx))
}

pub fn decode_tx_hex(raw: &str) -> Result<NodeTransaction, BridgeError> {
    let bytes = hex::decode(raw.trim())?;
    decode_tx(&bytes)
}
