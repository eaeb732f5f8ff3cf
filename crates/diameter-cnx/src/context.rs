use std::{collections::BTreeSet, fmt, io, net::SocketAddr, sync::Arc};

use diameter_cnx_core::{CnxError, Result};
use rustls_pki_types::ServerName;

use crate::{
    session::{HandshakeState, Role, TlsSession},
    transport::{
        BoxedByteStream, Protocol, SctpAssociation, SctpStreamParams, TransportHandle, TransportIo,
    },
};

/// 一条到对端的传输连接及其全部安全状态。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接上下文是句柄与 TLS 会话的唯一所有者：谁创建、谁握手、谁关闭都经由它，
///   保证任何失败路径下资源只释放一次；
/// - 对端管理器只需要两个结果：要么拿到一个主会话已通过校验的上下文，要么拿到一个错误。
///
/// ## 契约（What）
/// - SCTP 流参数与多条 TLS 会话只出现在 SCTP 连接上；
/// - TLS 状态要么完整（已校验的主会话，多流时外加 `pairs` 条派生会话，流编号 `0..pairs`），
///   要么完全不存在；
/// - [`ConnectionContext::close`] 幂等，`Drop` 时自动调用。
///
/// ## 风险与权衡（Trade-offs）
/// - TCP 握手成功后字节流进入主会话，传输槽位随之为空；握手失败时引擎把字节流交还槽位，
///   若超时导致字节流随握手 future 一起被丢弃，槽位保持为空；
/// - 关闭需要 `&mut self`，多个持有者共享上下文时应在外层加锁。
pub struct ConnectionContext<S> {
    socket_id: String,
    protocol: Protocol,
    local_endpoints: BTreeSet<SocketAddr>,
    remote_endpoints: BTreeSet<SocketAddr>,
    peer_hostname: Option<String>,
    sctp: Option<SctpStreamParams>,
    transport: Option<TransportIo>,
    role: Option<Role>,
    tls: Option<TlsState<S>>,
    state: HandshakeState,
    closed: bool,
}

pub(crate) struct TlsState<S> {
    pub(crate) master: S,
    pub(crate) streams: Vec<(u16, S)>,
}

impl<S> ConnectionContext<S> {
    /// 接管已连接的句柄。
    ///
    /// 句柄类型与协议不符、或 SCTP 流参数查询失败时，句柄会在返回错误前释放。
    pub fn create(handle: TransportHandle, protocol: Protocol) -> Result<Self> {
        let TransportHandle {
            id,
            local,
            peer,
            io,
        } = handle;

        let (transport, sctp) = match (protocol, io) {
            (Protocol::Tcp, TransportIo::Stream(stream)) => (TransportIo::Stream(stream), None),
            (Protocol::Tcp, TransportIo::Association(association)) => {
                association.shutdown();
                return Err(CnxError::invalid_argument(format!(
                    "{id}: an SCTP association cannot be adopted as a TCP connection"
                )));
            }
            (Protocol::Sctp, TransportIo::Association(association)) => {
                match association.stream_params() {
                    Ok(params) => (TransportIo::Association(association), Some(params)),
                    Err(source) => {
                        association.shutdown();
                        return Err(CnxError::TransportQuery { socket: id, source });
                    }
                }
            }
            (Protocol::Sctp, TransportIo::Stream(stream)) => {
                drop(stream);
                return Err(CnxError::TransportQuery {
                    socket: id,
                    source: io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "byte stream handle cannot report SCTP stream counts",
                    ),
                });
            }
        };

        if let Some(params) = sctp {
            tracing::debug!(
                socket = %id,
                inbound = params.inbound(),
                outbound = params.outbound(),
                pairs = params.pairs(),
                "sctp stream parameters discovered"
            );
        }

        Ok(Self {
            socket_id: id,
            protocol,
            local_endpoints: local.into_iter().collect(),
            remote_endpoints: peer.into_iter().collect(),
            peer_hostname: None,
            sctp,
            transport: Some(transport),
            role: None,
            tls: None,
            state: HandshakeState::Init,
            closed: false,
        })
    }

    /// 以 IP 协议号接管句柄；协议号不受支持时同样先释放句柄。
    pub fn create_with_ipproto(handle: TransportHandle, ipproto: i32) -> Result<Self> {
        let protocol = match Protocol::from_ipproto(ipproto) {
            Ok(protocol) => protocol,
            Err(err) => {
                release_handle(handle);
                return Err(err);
            }
        };
        Self::create(handle, protocol)
    }

    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn sctp_params(&self) -> Option<SctpStreamParams> {
        self.sctp
    }

    /// 可承载独立 TLS 会话的流数量，TCP 恒为 0。
    pub fn pairs(&self) -> u16 {
        self.sctp.map_or(0, |params| params.pairs())
    }

    pub fn local_endpoints(&self) -> &BTreeSet<SocketAddr> {
        &self.local_endpoints
    }

    pub fn remote_endpoints(&self) -> &BTreeSet<SocketAddr> {
        &self.remote_endpoints
    }

    /// 返回是否为新增地址。
    pub fn add_local_endpoint(&mut self, addr: SocketAddr) -> bool {
        self.local_endpoints.insert(addr)
    }

    pub fn add_remote_endpoint(&mut self, addr: SocketAddr) -> bool {
        self.remote_endpoints.insert(addr)
    }

    /// 设置客户端角色出示的服务端名称；不是合法 DNS 名称或 IP 地址时拒绝。
    pub fn set_peer_hostname(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if ServerName::try_from(name.as_str()).is_err() {
            return Err(CnxError::invalid_argument(format!(
                "{name:?} is not a valid peer hostname"
            )));
        }
        self.peer_hostname = Some(name);
        Ok(())
    }

    pub fn peer_hostname(&self) -> Option<&str> {
        self.peer_hostname.as_deref()
    }

    /// 握手时向对端出示的身份：显式主机名优先，否则取第一个远端地址。
    pub fn tls_peer_name(&self) -> Option<String> {
        self.peer_hostname.clone().or_else(|| {
            self.remote_endpoints
                .first()
                .map(|addr| addr.ip().to_string())
        })
    }

    /// 最近一次握手的角色。
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// 最近一次握手停留的状态。
    pub fn handshake_state(&self) -> HandshakeState {
        self.state
    }

    pub fn has_tls_state(&self) -> bool {
        self.tls.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_multi_stream(&self) -> bool {
        self.protocol == Protocol::Sctp && self.pairs() > 0
    }

    pub fn master_session(&self) -> Option<&S> {
        self.tls.as_ref().map(|tls| &tls.master)
    }

    /// TCP 连接上主会话就是数据通道；多流 SCTP 上主会话只作为恢复锚点保留。
    pub fn master_session_mut(&mut self) -> Option<&mut S> {
        self.tls.as_mut().map(|tls| &mut tls.master)
    }

    pub fn stream_session(&self, stream: u16) -> Option<&S> {
        self.tls.as_ref().and_then(|tls| {
            tls.streams
                .iter()
                .find(|(id, _)| *id == stream)
                .map(|(_, session)| session)
        })
    }

    pub fn stream_session_mut(&mut self, stream: u16) -> Option<&mut S> {
        self.tls.as_mut().and_then(|tls| {
            tls.streams
                .iter_mut()
                .find(|(id, _)| *id == stream)
                .map(|(_, session)| session)
        })
    }

    /// 按流编号升序遍历派生会话。
    pub fn stream_sessions(&self) -> impl Iterator<Item = (u16, &S)> + '_ {
        self.tls
            .iter()
            .flat_map(|tls| tls.streams.iter().map(|(id, session)| (*id, session)))
    }

    /// 释放句柄与全部 TLS 会话，重复调用无副作用。
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.tls = None;
        match self.transport.take() {
            Some(TransportIo::Association(association)) => association.shutdown(),
            Some(TransportIo::Stream(stream)) => drop(stream),
            None => {}
        }
        tracing::debug!(socket = %self.socket_id, "connection context closed");
    }

    pub(crate) fn begin_handshake(&mut self, role: Role) {
        self.role = Some(role);
        self.state = HandshakeState::Init;
    }

    pub(crate) fn set_state(&mut self, state: HandshakeState) {
        self.state = state;
    }

    pub(crate) fn first_peer(&self) -> Option<SocketAddr> {
        self.remote_endpoints.first().copied()
    }

    pub(crate) fn association(&self) -> Option<Arc<dyn SctpAssociation>> {
        match &self.transport {
            Some(TransportIo::Association(association)) => Some(Arc::clone(association)),
            _ => None,
        }
    }

    pub(crate) fn take_stream(&mut self) -> Option<BoxedByteStream> {
        match self.transport.take() {
            Some(TransportIo::Stream(stream)) => Some(stream),
            other => {
                self.transport = other;
                None
            }
        }
    }

    pub(crate) fn restore_stream(&mut self, stream: BoxedByteStream) {
        debug_assert!(self.transport.is_none(), "transport slot already occupied");
        self.transport = Some(TransportIo::Stream(stream));
    }

    pub(crate) fn bind_tls(&mut self, master: S, streams: Vec<(u16, S)>) {
        self.tls = Some(TlsState { master, streams });
    }
}

impl<S: TlsSession> ConnectionContext<S> {
    /// 向每条已建立的会话发送 `close_notify`，然后执行 [`close`](Self::close)。
    pub async fn shutdown(&mut self) {
        if let Some(tls) = self.tls.as_mut() {
            for (stream, session) in tls.streams.iter_mut() {
                if let Err(err) = session.shutdown().await {
                    tracing::debug!(
                        socket = %self.socket_id,
                        stream = *stream,
                        error = %err,
                        "close_notify failed"
                    );
                }
            }
            if let Err(err) = tls.master.shutdown().await {
                tracing::debug!(socket = %self.socket_id, error = %err, "close_notify failed");
            }
        }
        self.close();
    }
}

impl<S> Drop for ConnectionContext<S> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S> fmt::Debug for ConnectionContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("socket_id", &self.socket_id)
            .field("protocol", &self.protocol)
            .field("local_endpoints", &self.local_endpoints)
            .field("remote_endpoints", &self.remote_endpoints)
            .field("peer_hostname", &self.peer_hostname)
            .field("sctp", &self.sctp)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("tls", &self.tls.as_ref().map(|tls| tls.streams.len()))
            .field("closed", &self.closed)
            .finish()
    }
}

fn release_handle(handle: TransportHandle) {
    match handle.io {
        TransportIo::Association(association) => association.shutdown(),
        TransportIo::Stream(stream) => drop(stream),
    }
}
