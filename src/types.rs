use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

/// 署名鍵の導出ファミリー
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyFamily {
    /// 署名鍵が存在しない (外部アドレスなど)
    Unknown,
    LayerOne,
}

/// どの導出鍵が署名すべきかを示す
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLocator {
    pub key_family: KeyFamily,
    pub key_index: u32,
}

impl KeyLocator {
    pub fn unknown() -> Self {
        KeyLocator { key_family: KeyFamily::Unknown, key_index: 0 }
    }

    pub fn layer_one(key_index: u32) -> Self {
        KeyLocator { key_family: KeyFamily::LayerOne, key_index }
    }
}

/// リモート署名者に渡す入力/出力ごとの記述子
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignDescriptor {
    pub key_loc: KeyLocator,
    pub value_sat: u64,
}

/// 入力と位置で対応するウォレットの UTXO 情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub key_index: u32,
    pub amount_sat: u64,
    /// P2SH でラップされた UTXO か。省略不可。
    pub is_p2sh: bool,
}

/// ウォレット自身のおつり出力
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSpec {
    pub key_index: u32,
    pub value_sat: u64,
}

/// リクエスト元クライアントの識別情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// チャネル単位のクライアントの場合のみ設定される
    #[serde(default)]
    pub peer_id: Option<PublicKey>,
    #[serde(default)]
    pub dbid: u64,
}

impl Requester {
    /// peer_id (33 bytes) || dbid (u64 LE)
    pub fn channel_nonce(&self) -> Option<Vec<u8>> {
        self.peer_id.map(|peer_id| {
            let mut nonce = peer_id.serialize().to_vec();
            nonce.extend_from_slice(&self.dbid.to_le_bytes());
            nonce
        })
    }
}
