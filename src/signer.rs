use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bitcoin::secp256k1::PublicKey;
use bitcoin::Witness;

use crate::chainparams::{Bip32KeyVersion, ChainParams};
use crate::error::BridgeError;
use crate::protocol::{
    read_frame, write_frame, EcdhReq, EcdhRsp, InitHsmReq, InitHsmRsp, RpcReply, RpcRequest, RpcResult,
    SignTxReq, SignTxRsp,
};

/// 鍵を保管するリモート署名サービスへの操作。すべてブロッキング呼び出し。
pub trait RemoteSigner {
    fn ecdh(&mut self, self_node_id: &PublicKey, point: &PublicKey) -> Result<[u8; 32], BridgeError>;

    fn init_hsm(
        &mut self,
        key_version: &Bip32KeyVersion,
        chainparams: &ChainParams,
        hsm_secret: &[u8; 32],
    ) -> Result<PublicKey, BridgeError>;

    /// 入力ごとの署名を入力順で返す
    fn sign_withdrawal_tx(&mut self, req: SignTxReq) -> Result<Vec<Witness>, BridgeError>;

    fn sign_remote_commitment_tx(&mut self, req: SignTxReq) -> Result<Vec<Witness>, BridgeError>;
}

/// TCP 上のリモート署名クライアント。接続はプロセスの生存期間中保持される。
pub struct SignerClient {
    addr: String,
    stream: TcpStream,
    // 通信エラー後は以降の呼び出しをすべて拒否する
    broken: bool,
}

impl SignerClient {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, BridgeError> {
        log::info!("リモート署名サービスに接続します: {} (タイムアウト {:?})", addr, timeout);
        let candidates = addr
            .to_socket_addrs()
            .map_err(|e| BridgeError::Unavailable(format!("{}: {}", addr, e)))?;

        let mut last_err = None;
        for sock_addr in candidates {
            match TcpStream::connect_timeout(&sock_addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    log::info!("リモート署名サービスに接続しました: {}", sock_addr);
                    return Ok(SignerClient { addr: addr.to_string(), stream, broken: false });
                }
                Err(e) => {
                    log::warn!("{} への接続に失敗しました: {}", sock_addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(BridgeError::Unavailable(match last_err {
            Some(e) => format!("{}: {}", addr, e),
            None => format!("{}: アドレスを解決できません", addr),
        }))
    }

    fn call(&mut self, request: RpcRequest) -> Result<RpcResult, BridgeError> {
        if self.broken {
            return Err(BridgeError::Unavailable(format!(
                "{}: 以前の通信エラーにより接続は使用できません",
                self.addr
            )));
        }

        let method = request.method();
        log::debug!("リモート呼び出し: {}", method);
        let reply: RpcReply = write_frame(&mut self.stream, &request)
            .and_then(|_| read_frame(&mut self.stream))
            .map_err(|e| {
                self.broken = true;
                transport_error(e)
            })?;

        match reply {
            RpcReply::Result(result) => Ok(result),
            RpcReply::Error(status) => {
                log::warn!("{} が拒否されました ({}): {}", method, status.code, status.message);
                Err(BridgeError::Remote { code: status.code, message: status.message })
            }
        }
    }

    fn sign(&mut self, request: RpcRequest, num_inputs: usize) -> Result<Vec<Witness>, BridgeError> {
        match self.call(request)? {
            RpcResult::Signatures(SignTxRsp { sigs }) => {
                if sigs.len() != num_inputs {
                    return Err(BridgeError::Protocol(format!(
                        "署名数 {} が入力数 {} と一致しません",
                        sigs.len(),
                        num_inputs
                    )));
                }
                Ok(sigs)
            }
            other => Err(unexpected(&other)),
        }
    }
}

impl RemoteSigner for SignerClient {
    fn ecdh(&mut self, self_node_id: &PublicKey, point: &PublicKey) -> Result<[u8; 32], BridgeError> {
        let request = RpcRequest::Ecdh(EcdhReq { self_node_id: *self_node_id, point: *point });
        match self.call(request)? {
            RpcResult::Ecdh(EcdhRsp { shared_secret }) => Ok(shared_secret),
            other => Err(unexpected(&other)),
        }
    }

    fn init_hsm(
        &mut self,
        key_version: &Bip32KeyVersion,
        chainparams: &ChainParams,
        hsm_secret: &[u8; 32],
    ) -> Result<PublicKey, BridgeError> {
        let request = RpcRequest::InitHsm(InitHsmReq {
            key_version: *key_version,
            chainparams: chainparams.clone(),
            hsm_secret: *hsm_secret,
        });
        match self.call(request)? {
            RpcResult::InitHsm(InitHsmRsp { self_node_id }) => Ok(self_node_id),
            other => Err(unexpected(&other)),
        }
    }

    fn sign_withdrawal_tx(&mut self, req: SignTxReq) -> Result<Vec<Witness>, BridgeError> {
        let num_inputs = req.input_descs.len();
        self.sign(RpcRequest::SignWithdrawalTx(req), num_inputs)
    }

    fn sign_remote_commitment_tx(&mut self, req: SignTxReq) -> Result<Vec<Witness>, BridgeError> {
        let num_inputs = req.input_descs.len();
        self.sign(RpcRequest::SignRemoteCommitmentTx(req), num_inputs)
    }
}

fn transport_error(err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => BridgeError::Timeout,
        BridgeError::Io(e) => BridgeError::Unavailable(e.to_string()),
        BridgeError::Json(e) => BridgeError::Protocol(format!("応答を解析できません: {}", e)),
        other => other,
    }
}

fn unexpected(result: &RpcResult) -> BridgeError {
    BridgeError::Protocol(format!("予期しない応答: {:?}", result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteCode;
    use crate::protocol::RpcStatus;
    use crate::types::{KeyLocator, SignDescriptor};
    use std::net::TcpListener;
    use std::str::FromStr;
    use std::thread;

    const G: &str = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
    const G2: &str = "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5";

    fn pubkey(s: &str) -> PublicKey {
        PublicKey::from_str(s).unwrap()
    }

    /// 受信したリクエストごとに `respond` の結果を返す偽サーバー
    fn fake_server<F>(respond: F) -> (String, thread::JoinHandle<Vec<RpcRequest>>)
    where
        F: Fn(&RpcRequest) -> Option<RpcReply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            while let Ok(request) = read_frame::<_, RpcRequest>(&mut stream) {
                let reply = respond(&request);
                seen.push(request);
                match reply {
                    Some(reply) => write_frame(&mut stream, &reply).unwrap(),
                    None => thread::sleep(Duration::from_millis(300)),
                }
            }
            seen
        });
        (addr, handle)
    }

    fn sign_req(num_inputs: usize) -> SignTxReq {
        SignTxReq {
            self_node_id: pubkey(G),
            channel_nonce: Vec::new(),
            raw_tx_bytes: vec![2, 0, 0, 0],
            input_descs: vec![SignDescriptor { key_loc: KeyLocator::layer_one(1), value_sat: 10 }; num_inputs],
            output_descs: Vec::new(),
        }
    }

    #[test]
    fn ecdh_returns_shared_secret() {
        let (addr, handle) = fake_server(|_| {
            Some(RpcReply::Result(RpcResult::Ecdh(EcdhRsp { shared_secret: [0x42; 32] })))
        });
        let mut client = SignerClient::connect(&addr, Duration::from_secs(5)).unwrap();
        let ss = client.ecdh(&pubkey(G), &pubkey(G2)).unwrap();
        assert_eq!(ss, [0x42; 32]);
        drop(client);

        let seen = handle.join().unwrap();
        assert_eq!(seen, vec![RpcRequest::Ecdh(EcdhReq { self_node_id: pubkey(G), point: pubkey(G2) })]);
    }

    #[test]
    fn connection_is_reused_across_calls() {
        let (addr, handle) = fake_server(|request| {
            Some(match request {
                RpcRequest::InitHsm(_) => RpcReply::Result(RpcResult::InitHsm(InitHsmRsp { self_node_id: pubkey(G) })),
                _ => RpcReply::Result(RpcResult::Signatures(SignTxRsp { sigs: vec![Witness::new()] })),
            })
        });
        let mut client = SignerClient::connect(&addr, Duration::from_secs(5)).unwrap();
        let cp = ChainParams::for_network(bitcoin::Network::Regtest).unwrap();
        let node_id = client.init_hsm(&cp.bip32_key_version, &cp, &[1; 32]).unwrap();
        assert_eq!(node_id, pubkey(G));
        assert_eq!(client.sign_withdrawal_tx(sign_req(1)).unwrap().len(), 1);
        drop(client);

        assert_eq!(handle.join().unwrap().len(), 2);
    }

    #[test]
    fn remote_rejection_is_typed() {
        let (addr, _handle) = fake_server(|_| {
            Some(RpcReply::Error(RpcStatus {
                code: RemoteCode::InvalidArgument,
                message: "bad point".to_string(),
            }))
        });
        let mut client = SignerClient::connect(&addr, Duration::from_secs(5)).unwrap();
        let err = client.ecdh(&pubkey(G), &pubkey(G2)).unwrap_err();
        match err {
            BridgeError::Remote { code, message } => {
                assert_eq!(code, RemoteCode::InvalidArgument);
                assert_eq!(message, "bad point");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn signature_count_must_match_inputs() {
        let (addr, _handle) = fake_server(|_| {
            Some(RpcReply::Result(RpcResult::Signatures(SignTxRsp { sigs: vec![Witness::new()] })))
        });
        let mut client = SignerClient::connect(&addr, Duration::from_secs(5)).unwrap();
        let err = client.sign_remote_commitment_tx(sign_req(2)).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn wrong_reply_variant_is_protocol_error() {
        let (addr, _handle) = fake_server(|_| {
            Some(RpcReply::Result(RpcResult::InitHsm(InitHsmRsp { self_node_id: pubkey(G) })))
        });
        let mut client = SignerClient::connect(&addr, Duration::from_secs(5)).unwrap();
        assert!(matches!(client.ecdh(&pubkey(G), &pubkey(G2)), Err(BridgeError::Protocol(_))));
    }

    #[test]
    fn silent_signer_times_out_and_poisons_connection() {
        let (addr, _handle) = fake_server(|_| None);
        let mut client = SignerClient::connect(&addr, Duration::from_millis(100)).unwrap();
        assert!(matches!(client.ecdh(&pubkey(G), &pubkey(G2)), Err(BridgeError::Timeout)));
        assert!(matches!(client.ecdh(&pubkey(G), &pubkey(G2)), Err(BridgeError::Unavailable(_))));
    }

    #[test]
    fn refused_connection_is_unavailable() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let res = SignerClient::connect(&addr, Duration::from_millis(500));
        assert!(matches!(res, Err(BridgeError::Unavailable(_))));
    }
}
