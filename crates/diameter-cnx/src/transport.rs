use std::{
    fmt,
    io,
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use diameter_cnx_core::{CnxError, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

/// 传输协议族。
///
/// 只接受 TCP 与 SCTP；其它 IP 协议号在入口即被拒绝。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Sctp,
}

impl Protocol {
    pub const IPPROTO_TCP: i32 = 6;
    pub const IPPROTO_SCTP: i32 = 132;

    /// 由 IP 协议号解析协议族。
    pub fn from_ipproto(ipproto: i32) -> Result<Self> {
        match ipproto {
            Self::IPPROTO_TCP => Ok(Protocol::Tcp),
            Self::IPPROTO_SCTP => Ok(Protocol::Sctp),
            other => Err(CnxError::invalid_argument(format!(
                "unsupported transport protocol {other}"
            ))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SCTP 关联协商出的流数量。
///
/// `pairs` 恒等于 `min(inbound, outbound)`，由构造函数保证，不存在单独设置的入口。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SctpStreamParams {
    inbound: u16,
    outbound: u16,
    pairs: u16,
}

impl SctpStreamParams {
    pub const fn new(inbound: u16, outbound: u16) -> Self {
        let pairs = if inbound < outbound { inbound } else { outbound };
        Self {
            inbound,
            outbound,
            pairs,
        }
    }

    pub const fn inbound(&self) -> u16 {
        self.inbound
    }

    pub const fn outbound(&self) -> u16 {
        self.outbound
    }

    /// 双向都可用的流数量，即可以各自承载一条 TLS 会话的流。
    pub const fn pairs(&self) -> u16 {
        self.pairs
    }
}

/// 有序字节流能力：TCP 套接字、内存管道以及 SCTP 单流适配器都满足该约束。
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedByteStream = Box<dyn ByteStream>;

/// 已建立的 SCTP 关联。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 套接字的创建、绑定与监听不属于本 crate；这里只描述连接上下文需要向关联索取的能力，
///   使真实的 SCTP 绑定与测试用的内存关联可以互换；
/// - 以 `poll_*` 形式暴露收发，方便 [`crate::SctpStreamIo`] 在 `AsyncRead`/`AsyncWrite`
///   实现中直接调用，无需额外任务。
///
/// ## 契约（What）
/// - `stream_params`：查询入站/出站流数量，失败即 `TransportQuery`；
/// - `poll_send`：把一条完整消息发往指定流，成功返回时消息已全部交给关联；
/// - `poll_recv`：取出指定流上的下一条消息，`Ok(None)` 表示该流已结束；
///   返回 `Pending` 时必须登记 `cx` 的唤醒器；
/// - `shutdown`：释放关联，连接上下文保证只调用一次。
pub trait SctpAssociation: Send + Sync + 'static {
    fn stream_params(&self) -> io::Result<SctpStreamParams>;

    fn poll_send(&self, cx: &mut Context<'_>, stream: u16, message: &[u8])
    -> Poll<io::Result<()>>;

    fn poll_recv(&self, cx: &mut Context<'_>, stream: u16) -> Poll<io::Result<Option<Bytes>>>;

    fn shutdown(&self);
}

/// 调用方交给连接上下文的、已连接的原始句柄。
///
/// 上下文接管句柄后负责其唯一一次释放；即便 `create` 失败，句柄也会在返回前被释放。
pub struct TransportHandle {
    pub(crate) id: String,
    pub(crate) local: Vec<SocketAddr>,
    pub(crate) peer: Vec<SocketAddr>,
    pub(crate) io: TransportIo,
}

pub(crate) enum TransportIo {
    Stream(BoxedByteStream),
    Association(Arc<dyn SctpAssociation>),
}

impl TransportHandle {
    /// 以任意有序字节流构造句柄（TCP 或测试管道）。
    pub fn stream(id: impl Into<String>, io: impl ByteStream) -> Self {
        Self {
            id: id.into(),
            local: Vec::new(),
            peer: Vec::new(),
            io: TransportIo::Stream(Box::new(io)),
        }
    }

    /// 以已建立的 SCTP 关联构造句柄。
    pub fn association(id: impl Into<String>, association: Arc<dyn SctpAssociation>) -> Self {
        Self {
            id: id.into(),
            local: Vec::new(),
            peer: Vec::new(),
            io: TransportIo::Association(association),
        }
    }

    /// 接管已连接的 Tokio `TcpStream`，并以两端地址生成套接字标识。
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        Ok(Self::stream(format!("tcp:{local}->{peer}"), stream)
            .with_local_endpoints([local])
            .with_peer_endpoints([peer]))
    }

    pub fn with_local_endpoints(mut self, endpoints: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.local.extend(endpoints);
        self
    }

    pub fn with_peer_endpoints(mut self, endpoints: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.peer.extend(endpoints);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_association(&self) -> bool {
        matches!(self.io, TransportIo::Association(_))
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("peer", &self.peer)
            .field("association", &self.is_association())
            .finish()
    }
}
