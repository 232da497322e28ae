//! リモート署名サービスとのワイヤプロトコル。
//!
//! u32 (LE) の長さプレフィックス付き JSON フレームを TCP 上でやり取りする。

use std::io::{Read, Write};

use bitcoin::secp256k1::PublicKey;
use bitcoin::Witness;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::chainparams::{Bip32KeyVersion, ChainParams};
use crate::error::{BridgeError, RemoteCode};
use crate::types::SignDescriptor;

/// 1フレームの最大長 (1 MiB)
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhReq {
    pub self_node_id: PublicKey,
    pub point: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhRsp {
    #[serde(with = "hex::serde")]
    pub shared_secret: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitHsmReq {
    pub key_version: Bip32KeyVersion,
    pub chainparams: ChainParams,
    #[serde(with = "hex::serde")]
    pub hsm_secret: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitHsmRsp {
    pub self_node_id: PublicKey,
}

/// 出金・コミットメント署名で共通のリクエスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTxReq {
    pub self_node_id: PublicKey,
    /// マスタークライアントからのリクエストでは空
    #[serde(default, with = "hex::serde")]
    pub channel_nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub raw_tx_bytes: Vec<u8>,
    pub input_descs: Vec<SignDescriptor>,
    pub output_descs: Vec<SignDescriptor>,
}

/// 入力ごとの witness スタック (入力順)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignTxRsp {
    pub sigs: Vec<Witness>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    Ecdh(EcdhReq),
    InitHsm(InitHsmReq),
    SignWithdrawalTx(SignTxReq),
    SignRemoteCommitmentTx(SignTxReq),
}

impl RpcRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::Ecdh(_) => "ecdh",
            RpcRequest::InitHsm(_) => "init_hsm",
            RpcRequest::SignWithdrawalTx(_) => "sign_withdrawal_tx",
            RpcRequest::SignRemoteCommitmentTx(_) => "sign_remote_commitment_tx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResult {
    Ecdh(EcdhRsp),
    InitHsm(InitHsmRsp),
    Signatures(SignTxRsp),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: RemoteCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    Result(RpcResult),
    Error(RpcStatus),
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), BridgeError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(BridgeError::Protocol(format!("フレームが大きすぎます: {} bytes", body.len())));
    }
    writer.write_all(&(body.len() as u32).to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, BridgeError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_FRAME_LEN {
        return Err(BridgeError::Protocol(format!("フレームが大きすぎます: {} bytes", msg_len)));
    }

    let mut body = vec![0u8; msg_len];
    reader.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::str::FromStr;

    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[test]
    fn request_is_tagged_by_method() {
        let pk = PublicKey::from_str(G).unwrap();
        let req = RpcRequest::Ecdh(EcdhReq { self_node_id: pk, point: pk });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "ecdh");
        assert_eq!(json["params"]["point"], G);
    }

    #[test]
    fn frame_is_length_prefixed() {
        let reply = RpcReply::Error(RpcStatus {
            code: RemoteCode::Unavailable,
            message: "down".to_string(),
        });
        let mut buf = Vec::new();
        write_frame(&mut buf, &reply).unwrap();
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);

        let decoded: RpcReply = read_frame(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let res: Result<RpcReply, _> = read_frame(&mut Cursor::new(buf));
        assert!(matches!(res, Err(BridgeError::Protocol(_))));
    }

    #[test]
    fn signatures_carry_witness_items() {
        let json = r#"{"result":{"signatures":{"sigs":[["3044","02ab"],[]]}}}"#;
        let reply: RpcReply = serde_json::from_str(json).unwrap();
        match reply {
            RpcReply::Result(RpcResult::Signatures(SignTxRsp { sigs })) => {
                assert_eq!(sigs.len(), 2);
                assert_eq!(sigs[0].len(), 2);
                assert!(sigs[1].is_empty());
            }
            _ => panic!("Expected signatures"),
        }
    }
}
