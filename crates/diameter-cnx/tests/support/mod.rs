//! 集成测试共享夹具。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：连接上下文不创建套接字，测试需要可观察的替身：
//!   能统计释放次数的字节流、能统计关闭次数的内存 SCTP 关联、记录全部诊断事件的出口，
//!   以及按会话序号编排行为的脚本化 TLS 后端；
//! - **结构说明 (How)**：
//!   - `CountingStream`：包装 `tokio::io::DuplexStream`，`Drop` 时计数；
//!   - `MemoryAssociation`：每条流一对无界通道，`pair` 生成互为对端的两个关联；
//!   - `RecordingDiagnostics`：收集状态迁移、失败与完成事件；
//!   - `ScriptedBackend`：会话按创建顺序编号（0 为主会话，随后依次是 0..pairs 号流的派生会话）；
//!   - `pki`（rustls 后端启用时）：rcgen 生成的测试 CA 与叶子证书。
//! - **合同与边界 (What)**：夹具只服务于测试，不具备生产级安全属性。

#![allow(dead_code)]

#[cfg(feature = "backend-rustls")]
pub mod pki;

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    task::{Context, Poll},
};

use async_trait::async_trait;
use bytes::Bytes;
use diameter_cnx::{
    BoxedByteStream, CnxError, CredentialSet, DiagnosticsSink, HandshakeFailure, HandshakeReport,
    HandshakeState, PriorityPolicy, RejectionReasons, Role, SctpAssociation, SctpStreamParams,
    SecurityConfig, TlsBackend, TlsSession,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf},
    sync::mpsc,
};

/// 释放时计数的字节流。
pub struct CountingStream {
    inner: DuplexStream,
    drops: Arc<AtomicUsize>,
}

impl CountingStream {
    /// 返回（被测端字节流，对端字节流，释放计数）。
    pub fn pair() -> (Self, DuplexStream, Arc<AtomicUsize>) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: local,
                drops: Arc::clone(&drops),
            },
            remote,
            drops,
        )
    }
}

impl Drop for CountingStream {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountingStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// 内存中的 SCTP 关联。
pub struct MemoryAssociation {
    params: io::Result<SctpStreamParams>,
    outgoing: Vec<mpsc::UnboundedSender<Bytes>>,
    incoming: Vec<Mutex<mpsc::UnboundedReceiver<Bytes>>>,
    shutdowns: AtomicUsize,
}

impl MemoryAssociation {
    /// 生成互为对端的两个关联；`local` 为被测端看到的流参数，对端看到的方向相反。
    pub fn pair(local: SctpStreamParams) -> (Arc<Self>, Arc<Self>) {
        let lanes = usize::from(local.inbound().max(local.outbound()).max(1));
        let mut forward = Vec::with_capacity(lanes);
        let mut backward = Vec::with_capacity(lanes);
        for _ in 0..lanes {
            forward.push(mpsc::unbounded_channel());
            backward.push(mpsc::unbounded_channel());
        }
        let (a_out, b_in): (Vec<_>, Vec<_>) = forward.into_iter().unzip();
        let (b_out, a_in): (Vec<_>, Vec<_>) = backward.into_iter().unzip();

        let near = Self {
            params: Ok(local),
            outgoing: a_out,
            incoming: a_in.into_iter().map(Mutex::new).collect(),
            shutdowns: AtomicUsize::new(0),
        };
        let far = Self {
            params: Ok(SctpStreamParams::new(local.outbound(), local.inbound())),
            outgoing: b_out,
            incoming: b_in.into_iter().map(Mutex::new).collect(),
            shutdowns: AtomicUsize::new(0),
        };
        (Arc::new(near), Arc::new(far))
    }

    /// 流参数查询总是失败的关联。
    pub fn failing_query() -> Arc<Self> {
        Arc::new(Self {
            params: Err(io::Error::other("SCTP_STATUS unavailable")),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl SctpAssociation for MemoryAssociation {
    fn stream_params(&self) -> io::Result<SctpStreamParams> {
        match &self.params {
            Ok(params) => Ok(*params),
            Err(err) => Err(io::Error::new(err.kind(), err.to_string())),
        }
    }

    fn poll_send(
        &self,
        _cx: &mut Context<'_>,
        stream: u16,
        message: &[u8],
    ) -> Poll<io::Result<()>> {
        let Some(lane) = self.outgoing.get(usize::from(stream)) else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no outbound stream {stream}"),
            )));
        };
        if self.shutdown_count() > 0 {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Poll::Ready(
            lane.send(Bytes::copy_from_slice(message))
                .map_err(|_| io::ErrorKind::BrokenPipe.into()),
        )
    }

    fn poll_recv(&self, cx: &mut Context<'_>, stream: u16) -> Poll<io::Result<Option<Bytes>>> {
        let Some(lane) = self.incoming.get(usize::from(stream)) else {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no inbound stream {stream}"),
            )));
        };
        let mut receiver = lane.lock().expect("lane lock");
        receiver.poll_recv(cx).map(Ok)
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// 握手诊断记录。
#[derive(Default)]
pub struct RecordingDiagnostics {
    pub transitions: Mutex<Vec<(Option<u16>, HandshakeState, HandshakeState)>>,
    pub failures: Mutex<Vec<(Option<u16>, HandshakeState, CnxError)>>,
    pub completed: Mutex<Vec<(Option<u16>, bool)>>,
}

impl RecordingDiagnostics {
    pub fn states_of(&self, stream: Option<u16>) -> Vec<HandshakeState> {
        let transitions = self.transitions.lock().expect("transitions lock");
        let mut states = Vec::new();
        for (_, from, to) in transitions.iter().filter(|(id, ..)| *id == stream) {
            if states.is_empty() {
                states.push(*from);
            }
            states.push(*to);
        }
        states
    }

    pub fn failed_streams(&self) -> Vec<Option<u16>> {
        self.failures
            .lock()
            .expect("failures lock")
            .iter()
            .map(|(stream, ..)| *stream)
            .collect()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn state_changed(&self, report: &HandshakeReport<'_>, from: HandshakeState, to: HandshakeState) {
        self.transitions
            .lock()
            .expect("transitions lock")
            .push((report.stream, from, to));
    }

    fn handshake_failed(&self, report: &HandshakeReport<'_>, state: HandshakeState, error: &CnxError) {
        let copy = match error {
            CnxError::PeerRejected { reasons } => CnxError::rejected(*reasons),
            CnxError::HandshakeFailed { reason } => CnxError::handshake(reason.clone()),
            other => CnxError::invalid_argument(other.to_string()),
        };
        self.failures
            .lock()
            .expect("failures lock")
            .push((report.stream, state, copy));
    }

    fn handshake_completed(&self, report: &HandshakeReport<'_>, resumed: bool) {
        self.completed
            .lock()
            .expect("completed lock")
            .push((report.stream, resumed));
    }
}

/// 脚本化后端中单条会话的行为。
#[derive(Clone, Debug)]
pub struct Behaviour {
    pub fail_create: bool,
    pub fail_configure: bool,
    pub fail_credentials: bool,
    pub hang: bool,
    pub handshake: Result<(), HandshakeFailure>,
    pub rejection: RejectionReasons,
    pub resumed: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_configure: false,
            fail_credentials: false,
            hang: false,
            handshake: Ok(()),
            rejection: RejectionReasons::empty(),
            resumed: true,
        }
    }
}

impl Behaviour {
    pub fn rejecting(rejection: RejectionReasons) -> Self {
        Self {
            rejection,
            ..Self::default()
        }
    }

    pub fn failing(reason: HandshakeFailure) -> Self {
        Self {
            handshake: Err(reason),
            ..Self::default()
        }
    }
}

struct ScriptState {
    default: Behaviour,
    overrides: Mutex<HashMap<usize, Behaviour>>,
    created: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

/// 按会话创建顺序编排行为的 TLS 后端。
#[derive(Clone)]
pub struct ScriptedBackend {
    state: Arc<ScriptState>,
}

impl ScriptedBackend {
    pub fn new(default: Behaviour) -> Self {
        Self {
            state: Arc::new(ScriptState {
                default,
                overrides: Mutex::new(HashMap::new()),
                created: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }),
        }
    }

    /// 为第 `index` 条创建的会话指定行为。
    pub fn with_session(self, index: usize, behaviour: Behaviour) -> Self {
        self.state
            .overrides
            .lock()
            .expect("overrides lock")
            .insert(index, behaviour);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.calls.lock().expect("calls lock").clone()
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }
}

impl TlsBackend for ScriptedBackend {
    type Session = ScriptedSession;

    fn create_session(&self, role: Role) -> diameter_cnx::Result<ScriptedSession> {
        let index = self.state.created.fetch_add(1, Ordering::SeqCst);
        let behaviour = self
            .state
            .overrides
            .lock()
            .expect("overrides lock")
            .get(&index)
            .cloned()
            .unwrap_or_else(|| self.state.default.clone());
        let session = ScriptedSession {
            index,
            role,
            behaviour,
            io: None,
            negotiated: false,
            state: Arc::clone(&self.state),
        };
        session.log("create");
        if session.behaviour.fail_create {
            return Err(CnxError::invalid_config("scripted session creation failure"));
        }
        Ok(session)
    }
}

pub struct ScriptedSession {
    index: usize,
    role: Role,
    behaviour: Behaviour,
    io: Option<BoxedByteStream>,
    negotiated: bool,
    state: Arc<ScriptState>,
}

impl ScriptedSession {
    fn log(&self, call: &str) {
        self.state
            .calls
            .lock()
            .expect("calls lock")
            .push(format!("{}:{}:{call}", self.index, self.role));
    }
}

#[async_trait]
impl TlsSession for ScriptedSession {
    type Resumption = usize;

    fn role(&self) -> Role {
        self.role
    }

    fn configure(&mut self, _policy: &PriorityPolicy) -> diameter_cnx::Result<()> {
        self.log("configure");
        if self.behaviour.fail_configure {
            return Err(CnxError::invalid_config("scripted priority failure"));
        }
        Ok(())
    }

    fn set_credentials(&mut self, _credentials: &CredentialSet) -> diameter_cnx::Result<()> {
        self.log("set_credentials");
        if self.behaviour.fail_credentials {
            return Err(CnxError::invalid_config("scripted credential failure"));
        }
        Ok(())
    }

    fn require_peer_certificate(&mut self) -> diameter_cnx::Result<()> {
        self.log("require_peer_certificate");
        Ok(())
    }

    fn bind_io(&mut self, io: BoxedByteStream, _peer_name: &str) -> diameter_cnx::Result<()> {
        self.log("bind_io");
        self.io = Some(io);
        Ok(())
    }

    fn resume_from(&mut self, params: &usize) -> diameter_cnx::Result<()> {
        self.log(&format!("resume_from:{params}"));
        Ok(())
    }

    async fn handshake(&mut self) -> Result<(), HandshakeFailure> {
        self.log("handshake");
        if self.behaviour.hang {
            std::future::pending::<()>().await;
        }
        self.behaviour.handshake.clone()?;
        self.negotiated = true;
        Ok(())
    }

    fn verify_peer(&self) -> diameter_cnx::Result<RejectionReasons> {
        self.log("verify_peer");
        Ok(self.behaviour.rejection)
    }

    fn is_resumed(&self) -> bool {
        self.behaviour.resumed
    }

    fn resumption_params(&self) -> Option<usize> {
        self.negotiated.then_some(self.index)
    }

    fn release_io(&mut self) -> Option<BoxedByteStream> {
        self.io.take()
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.log("shutdown");
        Ok(())
    }
}

impl AsyncRead for ScriptedSession {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedSession {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// 脚本化后端不解析证书，占位凭据即可。
pub fn placeholder_security() -> SecurityConfig {
    let credentials = CredentialSet::new(
        vec![CertificateDer::from(vec![0x30, 0x00])],
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![0x30, 0x00])),
        vec![CertificateDer::from(vec![0x30, 0x00])],
    )
    .expect("placeholder credentials");
    SecurityConfig::new(credentials)
}

pub fn test_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 1], port))
}
