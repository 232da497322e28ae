use std::io::{BufRead, Write};

use bitcoin::secp256k1::PublicKey;
use bitcoin::Network as BitcoinNetwork;
use bitcoin::Witness;
use serde::{Deserialize, Serialize};

use crate::chainparams::{Bip32KeyVersion, ChainParams};
use crate::cli::parse_network;
use crate::config::BridgeConfig;
use crate::descriptors::{build_commitment_descriptors, build_withdrawal_descriptors};
use crate::error::{BridgeError, InvariantViolation};
use crate::protocol::SignTxReq;
use crate::signer::RemoteSigner;
use crate::transaction::{encode_tx, TxOutputRecord, TxPayload};
use crate::types::{ChangeSpec, Requester, Utxo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitRequest {
    pub key_version: Bip32KeyVersion,
    /// 省略時は設定されたネットワークのパラメータを使う
    #[serde(default)]
    pub chainparams: Option<ChainParams>,
    #[serde(with = "hex::serde")]
    pub hsm_secret: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdhRequest {
    #[serde(default)]
    pub requester: Requester,
    pub point: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChannelBasepoints {
    #[serde(default)]
    pub requester: Requester,
    pub peer_id: PublicKey,
    pub dbid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassClientHsmfd {
    #[serde(default)]
    pub requester: Requester,
    pub id: PublicKey,
    pub dbid: u64,
    pub capabilities: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPerCommitmentPoint {
    #[serde(default)]
    pub requester: Requester,
    pub n: u64,
    pub dbid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CannouncementSig {
    #[serde(default)]
    pub requester: Requester,
    #[serde(with = "hex::serde")]
    pub announcement: Vec<u8>,
    pub node_id: PublicKey,
    pub dbid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignWithdrawalTx {
    #[serde(default)]
    pub requester: Requester,
    pub satoshi_out: u64,
    pub change_out: u64,
    pub change_keyindex: u32,
    /// 呼び出し側が意図した外部出力。ちょうど1つでなければならない。
    pub outputs: Vec<TxOutputRecord>,
    pub utxos: Vec<Utxo>,
    pub tx: TxPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRemoteCommitmentTx {
    #[serde(default)]
    pub requester: Requester,
    pub tx: TxPayload,
    pub remote_funding_pubkey: PublicKey,
    pub funding_sat: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdateSig {
    #[serde(default, with = "hex::serde")]
    pub cu: Vec<u8>,
}

/// ノードから届くリクエスト。`kind` タグで振り分ける。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    Init(InitRequest),
    Ecdh(EcdhRequest),
    GetChannelBasepoints(GetChannelBasepoints),
    PassClientHsmfd(PassClientHsmfd),
    GetPerCommitmentPoint(GetPerCommitmentPoint),
    CannouncementSig(CannouncementSig),
    SignWithdrawalTx(SignWithdrawalTx),
    SignRemoteCommitmentTx(SignRemoteCommitmentTx),
    ChannelUpdateSig(ChannelUpdateSig),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Init(_) => "init",
            Request::Ecdh(_) => "ecdh",
            Request::GetChannelBasepoints(_) => "get_channel_basepoints",
            Request::PassClientHsmfd(_) => "pass_client_hsmfd",
            Request::GetPerCommitmentPoint(_) => "get_per_commitment_point",
            Request::CannouncementSig(_) => "cannouncement_sig",
            Request::SignWithdrawalTx(_) => "sign_withdrawal_tx",
            Request::SignRemoteCommitmentTx(_) => "sign_remote_commitment_tx",
            Request::ChannelUpdateSig(_) => "channel_update_sig",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    NodeId {
        node_id: PublicKey,
    },
    SharedSecret {
        #[serde(with = "hex::serde")]
        shared_secret: [u8; 32],
    },
    Signatures {
        sigs: Vec<Witness>,
    },
    /// 「処理済みで何もすることがない」とは区別される
    NotImplemented {
        request: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Response),
    Error(ErrorReply),
}

/// リクエストを対応するハンドラへ振り分ける。
/// リモート署名クライアントはここが唯一の所有者。
pub struct Dispatcher<S: RemoteSigner> {
    signer: S,
    network: BitcoinNetwork,
    forward_unclassified_commitments: bool,
    self_node_id: Option<PublicKey>,
}

impl<S: RemoteSigner> Dispatcher<S> {
    pub fn new(signer: S, config: &BridgeConfig) -> Result<Self, BridgeError> {
        Ok(Dispatcher {
            signer,
            network: parse_network(&config.network)?,
            forward_unclassified_commitments: config.forward_unclassified_commitments,
            self_node_id: None,
        })
    }

    /// すべてのハンドラ共通のエラー境界。失敗はログに残し、型付きエラーとして返す。
    pub fn handle(&mut self, request: Request) -> Result<Response, BridgeError> {
        let kind = request.kind();
        log::debug!("リクエスト受信: {}", kind);
        self.route(request).map_err(|e| {
            log::error!("{} の処理に失敗しました [{}]: {}", kind, e.kind(), e);
            e
        })
    }

    pub fn handle_json(&mut self, line: &str) -> Result<Response, BridgeError> {
        let request: Request = serde_json::from_str(line).map_err(|e| {
            log::error!("リクエストを解析できません: {}", e);
            BridgeError::UnsupportedRequest(e.to_string())
        })?;
        self.handle(request)
    }

    fn route(&mut self, request: Request) -> Result<Response, BridgeError> {
        match request {
            Request::Init(req) => self.init(req),
            Request::Ecdh(req) => self.ecdh(req),
            Request::SignWithdrawalTx(req) => self.sign_withdrawal_tx(req),
            Request::SignRemoteCommitmentTx(req) => self.sign_remote_commitment_tx(req),
            other @ (Request::GetChannelBasepoints(_)
            | Request::PassClientHsmfd(_)
            | Request::GetPerCommitmentPoint(_)
            | Request::CannouncementSig(_)
            | Request::ChannelUpdateSig(_)) => {
                log::info!("{} は未実装です: {:?}", other.kind(), other);
                Ok(Response::NotImplemented { request: other.kind().to_string() })
            }
        }
    }

    fn node_id(&self) -> Result<PublicKey, BridgeError> {
        self.self_node_id.ok_or(BridgeError::NotInitialized)
    }

    fn init(&mut self, req: InitRequest) -> Result<Response, BridgeError> {
        let chainparams = match req.chainparams {
            Some(cp) => cp,
            None => ChainParams::for_network(self.network)?,
        };
        log::info!(
            "init: network={}, key_version=({:#010x}, {:#010x})",
            chainparams.network_name,
            req.key_version.pubkey_version,
            req.key_version.privkey_version
        );

        let node_id = self.signer.init_hsm(&req.key_version, &chainparams, &req.hsm_secret)?;
        log::info!("init 完了: node_id={}", node_id);
        self.self_node_id = Some(node_id);
        Ok(Response::NodeId { node_id })
    }

    fn ecdh(&mut self, req: EcdhRequest) -> Result<Response, BridgeError> {
        let self_node_id = self.node_id()?;
        log::debug!("ecdh: requester={:?}, point={}", req.requester, req.point);
        let shared_secret = self.signer.ecdh(&self_node_id, &req.point)?;
        Ok(Response::SharedSecret { shared_secret })
    }

    fn sign_withdrawal_tx(&mut self, req: SignWithdrawalTx) -> Result<Response, BridgeError> {
        let self_node_id = self.node_id()?;
        log::info!(
            "sign_withdrawal_tx: requester={:?}, satoshi_out={}, change_out={}, change_keyindex={}",
            req.requester,
            req.satoshi_out,
            req.change_out,
            req.change_keyindex
        );

        if req.outputs.len() != 1 {
            return Err(InvariantViolation::ExternalOutputCount(req.outputs.len()).into());
        }
        let tx = req.tx.into_transaction()?;
        let change = ChangeSpec { key_index: req.change_keyindex, value_sat: req.change_out };
        let (input_descs, output_descs) =
            build_withdrawal_descriptors(&tx.inputs, &req.utxos, &change, &req.outputs[0], &tx.outputs)?;

        let raw_tx_bytes = encode_tx(&tx);
        log::debug!("raw tx: {}", hex::encode(&raw_tx_bytes));
        let sigs = self.signer.sign_withdrawal_tx(SignTxReq {
            self_node_id,
            channel_nonce: req.requester.channel_nonce().unwrap_or_default(),
            raw_tx_bytes,
            input_descs,
            output_descs,
        })?;
        log::info!("sign_withdrawal_tx 完了: 署名 {} 件", sigs.len());
        Ok(Response::Signatures { sigs })
    }

    fn sign_remote_commitment_tx(&mut self, req: SignRemoteCommitmentTx) -> Result<Response, BridgeError> {
        let self_node_id = self.node_id()?;
        log::info!(
            "sign_remote_commitment_tx: requester={:?}, remote_funding_pubkey={}, funding_sat={}",
            req.requester,
            req.remote_funding_pubkey,
            req.funding_sat
        );

        let tx = req.tx.into_transaction()?;
        if !self.forward_unclassified_commitments {
            log::warn!("コミットメント出力の分類は未実装のため転送しません");
            return Ok(Response::NotImplemented { request: "sign_remote_commitment_tx".to_string() });
        }
        log::warn!("コミットメント記述子は未分類のまま転送されます");

        let (input_descs, output_descs) = build_commitment_descriptors(&tx.inputs, &tx.outputs);
        let sigs = self.signer.sign_remote_commitment_tx(SignTxReq {
            self_node_id,
            channel_nonce: req.requester.channel_nonce().unwrap_or_default(),
            raw_tx_bytes: encode_tx(&tx),
            input_descs,
            output_descs,
        })?;
        Ok(Response::Signatures { sigs })
    }
}

/// 1行1リクエストの JSON を読み、1行1応答で書き出す。EOF で終了する。
/// 解析できない行にはその行だけエラー応答を返し、処理を続ける。
pub fn serve<S, R, W>(dispatcher: &mut Dispatcher<S>, mut reader: R, mut writer: W) -> Result<(), BridgeError>
where
    S: RemoteSigner,
    R: BufRead,
    W: Write,
{
    let mut handled = 0usize;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let result = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => dispatcher.handle_json(line),
            Err(e) => {
                log::error!("リクエストが UTF-8 ではありません: {}", e);
                Err(BridgeError::UnsupportedRequest(format!("UTF-8 ではない入力: {}", e)))
            }
        };
        let reply = match result {
            Ok(response) => Reply::Ok(response),
            Err(e) => Reply::Error(ErrorReply { kind: e.kind().to_string(), message: e.to_string() }),
        };
        serde_json::to_writer(&mut writer, &reply)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        handled += 1;
    }
    log::info!("入力が終了しました。処理したリクエスト数: {}", handled);
    Ok(())
}
