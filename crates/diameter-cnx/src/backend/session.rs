use std::{
    fmt, io, mem,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use diameter_cnx_core::{
    CnxError, CredentialSet, HandshakeFailure, PriorityPolicy, RejectionReasons, Result,
    TlsVersion,
};
use rustls::{
    ClientConfig, HandshakeKind, ProtocolVersion, ServerConfig, SupportedProtocolVersion,
    crypto::CryptoProvider,
};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::{TlsAcceptor, TlsConnector, client, server};

use super::{
    error::classify_handshake_error,
    verifier::{RecordingClientVerifier, RecordingServerVerifier, VerificationRecord},
};
use crate::{
    session::{Role, TlsSession},
    transport::BoxedByteStream,
};

/// 主会话导出的恢复参数。
///
/// 派生会话复用同一份 rustls 配置：客户端侧共享会话缓存，服务端侧共享会话存储，
/// 因此握手时会按会话标识恢复；校验记录同样共享。
#[derive(Clone)]
pub struct RustlsResumption {
    config: SharedConfig,
    server_name: Option<ServerName<'static>>,
    record: Arc<VerificationRecord>,
}

impl fmt::Debug for RustlsResumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsResumption")
            .field("role", &self.config.role())
            .field("server_name", &self.server_name)
            .finish()
    }
}

#[derive(Clone)]
enum SharedConfig {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

impl SharedConfig {
    fn role(&self) -> Role {
        match self {
            SharedConfig::Client(_) => Role::Client,
            SharedConfig::Server(_) => Role::Server,
        }
    }
}

struct ResolvedPolicy {
    provider: Arc<CryptoProvider>,
    versions: Vec<&'static SupportedProtocolVersion>,
}

enum Established {
    Client(client::TlsStream<BoxedByteStream>),
    Server(server::TlsStream<BoxedByteStream>),
}

impl Established {
    fn into_io(self) -> BoxedByteStream {
        match self {
            Established::Client(stream) => stream.into_inner().0,
            Established::Server(stream) => stream.into_inner().0,
        }
    }
}

enum Stage {
    Idle,
    Bound(BoxedByteStream),
    Established(Box<Established>),
    Released,
}

/// rustls 实现的 TLS 会话。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - rustls 的配置在构建后不可变，而握手引擎按步骤逐项设置策略、凭据与对端要求，
///   因此会话先收集各项输入并逐项校验，在 `bind_io` 时一次性构建配置；
/// - 使用 tokio-rustls 的 `into_fallible` 握手，失败时取回底层字节流，
///   让连接上下文保持“句柄只释放一次”的保证。
///
/// ## 契约（What）
/// - `configure` 解析套件名称与协议版本，未知套件或版本与套件不兼容即 `InvalidConfig`；
/// - `set_credentials` 预先加载私钥与信任锚，失败即 `InvalidConfig`；
/// - 恢复是否成功以 rustls 报告的握手类型为准；
/// - 未握手或已交还字节流的会话读写返回 `NotConnected`。
pub struct RustlsSession {
    role: Role,
    provider: Arc<CryptoProvider>,
    policy: Option<ResolvedPolicy>,
    credentials: Option<CredentialSet>,
    require_peer: bool,
    resume: Option<RustlsResumption>,
    shared: Option<RustlsResumption>,
    stage: Stage,
    negotiated: bool,
    resumed: bool,
}

impl RustlsSession {
    pub(crate) fn new(role: Role, provider: Arc<CryptoProvider>) -> Self {
        Self {
            role,
            provider,
            policy: None,
            credentials: None,
            require_peer: false,
            resume: None,
            shared: None,
            stage: Stage::Idle,
            negotiated: false,
            resumed: false,
        }
    }

    /// 协商出的协议版本；未建立时为 `None`。
    pub fn protocol_version(&self) -> Option<TlsVersion> {
        let Stage::Established(established) = &self.stage else {
            return None;
        };
        let version = match established.as_ref() {
            Established::Client(stream) => stream.get_ref().1.protocol_version(),
            Established::Server(stream) => stream.get_ref().1.protocol_version(),
        };
        match version? {
            ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }

    fn build_shared(&self, peer_name: &str) -> Result<RustlsResumption> {
        let policy = self
            .policy
            .as_ref()
            .ok_or_else(|| CnxError::invalid_argument("tls session bound before configure"))?;
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            CnxError::invalid_argument("tls session bound before credentials were set")
        })?;
        let record = Arc::new(VerificationRecord::default());

        match self.role {
            Role::Client => {
                let server_name = ServerName::try_from(peer_name.to_owned()).map_err(|err| {
                    CnxError::invalid_argument(format!("peer name {peer_name:?}: {err}"))
                })?;
                let verifier = RecordingServerVerifier::new(
                    credentials,
                    &policy.provider,
                    Arc::clone(&record),
                )?;
                let config = ClientConfig::builder_with_provider(Arc::clone(&policy.provider))
                    .with_protocol_versions(&policy.versions)
                    .map_err(config_error)?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_client_auth_cert(
                        credentials.chain().to_vec(),
                        credentials.key().clone_key(),
                    )
                    .map_err(config_error)?;
                Ok(RustlsResumption {
                    config: SharedConfig::Client(Arc::new(config)),
                    server_name: Some(server_name),
                    record,
                })
            }
            Role::Server => {
                let builder = ServerConfig::builder_with_provider(Arc::clone(&policy.provider))
                    .with_protocol_versions(&policy.versions)
                    .map_err(config_error)?;
                let builder = if self.require_peer {
                    let verifier = RecordingClientVerifier::new(
                        credentials,
                        &policy.provider,
                        Arc::clone(&record),
                    )?;
                    builder.with_client_cert_verifier(Arc::new(verifier))
                } else {
                    builder.with_no_client_auth()
                };
                let mut config = builder
                    .with_single_cert(credentials.chain().to_vec(), credentials.key().clone_key())
                    .map_err(config_error)?;
                // TCP 不恢复，多流走 TLS1.2 会话标识；握手后再写票据只会在对端已关闭时
                // 把证书结论变成一次写失败。
                config.send_tls13_tickets = 0;
                Ok(RustlsResumption {
                    config: SharedConfig::Server(Arc::new(config)),
                    server_name: None,
                    record,
                })
            }
        }
    }

    /// 握手 IO 失败后的收尾：校验器已经给出拒绝结论时，以结论为准。
    ///
    /// 对端在收到拒绝前就可能关闭连接，此时 IO 错误只是结论的副作用；
    /// 会话保持 `Bound`，由 `verify_peer` 报告子原因，字节流照常交还。
    fn settle_failure(
        &mut self,
        record: &VerificationRecord,
        err: &io::Error,
        io: BoxedByteStream,
    ) -> core::result::Result<(), HandshakeFailure> {
        self.stage = Stage::Bound(io);
        match record.outcome() {
            Some(reasons) if !reasons.is_empty() => {
                tracing::debug!(
                    error = %err,
                    reasons = %reasons,
                    "handshake io failed after the peer certificate was refused"
                );
                self.negotiated = true;
                Ok(())
            }
            _ => Err(classify_handshake_error(err)),
        }
    }

    fn established_mut(&mut self) -> io::Result<&mut Established> {
        match &mut self.stage {
            Stage::Established(established) => Ok(established.as_mut()),
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "tls session is not established",
            )),
        }
    }
}

#[async_trait]
impl TlsSession for RustlsSession {
    type Resumption = RustlsResumption;

    fn role(&self) -> Role {
        self.role
    }

    fn configure(&mut self, policy: &PriorityPolicy) -> Result<()> {
        let cipher_suites = if policy.cipher_suites().is_empty() {
            self.provider.cipher_suites.clone()
        } else {
            policy
                .cipher_suites()
                .iter()
                .map(|name| {
                    self.provider
                        .cipher_suites
                        .iter()
                        .find(|suite| format!("{:?}", suite.suite()) == *name)
                        .copied()
                        .ok_or_else(|| {
                            CnxError::invalid_config(format!("unknown cipher suite {name}"))
                        })
                })
                .collect::<Result<Vec<_>>>()?
        };
        let provider = Arc::new(CryptoProvider {
            cipher_suites,
            ..(*self.provider).clone()
        });
        let versions: Vec<&'static SupportedProtocolVersion> = policy
            .versions()
            .map(|version| match version {
                TlsVersion::Tls12 => &rustls::version::TLS12,
                TlsVersion::Tls13 => &rustls::version::TLS13,
            })
            .collect();

        // 套件与版本不兼容时 rustls 在这里拒绝，提前暴露部署错误。
        ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(&versions)
            .map_err(config_error)?;

        self.policy = Some(ResolvedPolicy { provider, versions });
        Ok(())
    }

    fn set_credentials(&mut self, credentials: &CredentialSet) -> Result<()> {
        self.provider
            .key_provider
            .load_private_key(credentials.key().clone_key())
            .map_err(config_error)?;
        self.credentials = Some(credentials.clone());
        Ok(())
    }

    fn require_peer_certificate(&mut self) -> Result<()> {
        if self.role != Role::Server {
            return Err(CnxError::invalid_argument(
                "only the server role requests a peer certificate",
            ));
        }
        self.require_peer = true;
        Ok(())
    }

    fn bind_io(&mut self, io: BoxedByteStream, peer_name: &str) -> Result<()> {
        if !matches!(self.stage, Stage::Idle) {
            return Err(CnxError::invalid_argument("tls session is already bound"));
        }
        let shared = match &self.resume {
            Some(params) => params.clone(),
            None => self.build_shared(peer_name)?,
        };
        self.shared = Some(shared);
        self.stage = Stage::Bound(io);
        Ok(())
    }

    fn resume_from(&mut self, params: &RustlsResumption) -> Result<()> {
        if params.config.role() != self.role {
            return Err(CnxError::invalid_argument(format!(
                "cannot resume a {} session from {} parameters",
                self.role,
                params.config.role()
            )));
        }
        self.resume = Some(params.clone());
        Ok(())
    }

    async fn handshake(&mut self) -> core::result::Result<(), HandshakeFailure> {
        let io = match mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Bound(io) => io,
            other => {
                self.stage = other;
                return Err(HandshakeFailure::Protocol(
                    "tls session is not bound to a transport".into(),
                ));
            }
        };
        let Some(shared) = self.shared.clone() else {
            self.stage = Stage::Bound(io);
            return Err(HandshakeFailure::Protocol(
                "tls session has no configuration".into(),
            ));
        };

        match (&shared.config, shared.server_name) {
            (SharedConfig::Client(config), Some(server_name)) => {
                let connector = TlsConnector::from(Arc::clone(config));
                match connector.connect(server_name, io).into_fallible().await {
                    Ok(stream) => {
                        self.resumed =
                            stream.get_ref().1.handshake_kind() == Some(HandshakeKind::Resumed);
                        self.stage = Stage::Established(Box::new(Established::Client(stream)));
                    }
                    Err((err, io)) => return self.settle_failure(&shared.record, &err, io),
                }
            }
            (SharedConfig::Server(config), _) => {
                let acceptor = TlsAcceptor::from(Arc::clone(config));
                match acceptor.accept(io).into_fallible().await {
                    Ok(stream) => {
                        self.resumed =
                            stream.get_ref().1.handshake_kind() == Some(HandshakeKind::Resumed);
                        self.stage = Stage::Established(Box::new(Established::Server(stream)));
                    }
                    Err((err, io)) => return self.settle_failure(&shared.record, &err, io),
                }
            }
            (SharedConfig::Client(_), None) => {
                self.stage = Stage::Bound(io);
                return Err(HandshakeFailure::Protocol(
                    "client session has no server name".into(),
                ));
            }
        }
        self.negotiated = true;
        Ok(())
    }

    fn verify_peer(&self) -> Result<RejectionReasons> {
        let Some(shared) = self.shared.as_ref().filter(|_| self.negotiated) else {
            return Err(CnxError::invalid_argument(
                "peer verification requested before negotiation",
            ));
        };
        Ok(shared
            .record
            .outcome()
            .unwrap_or(RejectionReasons::UNTRUSTED))
    }

    fn is_resumed(&self) -> bool {
        self.resumed
    }

    fn resumption_params(&self) -> Option<RustlsResumption> {
        self.shared.clone().filter(|_| self.negotiated)
    }

    fn release_io(&mut self) -> Option<BoxedByteStream> {
        match mem::replace(&mut self.stage, Stage::Released) {
            Stage::Bound(io) => Some(io),
            Stage::Established(established) => Some(established.into_io()),
            Stage::Idle | Stage::Released => None,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        let Stage::Established(established) = &mut self.stage else {
            return Ok(());
        };
        match established.as_mut() {
            Established::Client(stream) => stream.shutdown().await,
            Established::Server(stream) => stream.shutdown().await,
        }
    }
}

impl AsyncRead for RustlsSession {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().established_mut() {
            Ok(Established::Client(stream)) => Pin::new(stream).poll_read(cx, buf),
            Ok(Established::Server(stream)) => Pin::new(stream).poll_read(cx, buf),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl AsyncWrite for RustlsSession {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().established_mut() {
            Ok(Established::Client(stream)) => Pin::new(stream).poll_write(cx, data),
            Ok(Established::Server(stream)) => Pin::new(stream).poll_write(cx, data),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().established_mut() {
            Ok(Established::Client(stream)) => Pin::new(stream).poll_flush(cx),
            Ok(Established::Server(stream)) => Pin::new(stream).poll_flush(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().established_mut() {
            Ok(Established::Client(stream)) => Pin::new(stream).poll_shutdown(cx),
            Ok(Established::Server(stream)) => Pin::new(stream).poll_shutdown(cx),
            Err(err) => Poll::Ready(Err(err)),
        }
    }
}

impl fmt::Debug for RustlsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match &self.stage {
            Stage::Idle => "idle",
            Stage::Bound(_) => "bound",
            Stage::Established(_) => "established",
            Stage::Released => "released",
        };
        f.debug_struct("RustlsSession")
            .field("role", &self.role)
            .field("stage", &stage)
            .field("negotiated", &self.negotiated)
            .field("resumed", &self.resumed)
            .finish()
    }
}

fn config_error(err: rustls::Error) -> CnxError {
    CnxError::invalid_config(err.to_string())
}
