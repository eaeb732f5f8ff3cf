use std::{net::SocketAddr, sync::Arc};

use diameter_cnx_core::{
    CnxError, HandshakeFailure, PriorityPolicy, Result, SecurityConfig, TlsVersion,
};

use crate::{
    context::ConnectionContext,
    coordinator,
    diagnostics::{DiagnosticsSink, HandshakeReport, TracingDiagnostics},
    session::{HandshakeState, Role, TlsBackend, TlsSession},
    stream_io::{SctpStreamIo, StreamIoConfig},
    transport::{BoxedByteStream, SctpAssociation},
    util::run_with_timeout,
};

/// TLS 握手引擎：在已接管的连接上完成一次带强制对端校验的握手。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“协商成功”与“身份可信”拆成两个阶段：协商阶段的任何失败都是终态，
///   协商成功后必须再通过对端证书校验，“已连接但未校验”的结果不存在；
/// - 多流 SCTP 场景下，主会话校验通过后交给 [`coordinator`] 在每条流上派生会话，
///   任何一条流失败都让整个上下文的安全状态作废。
///
/// ## 逻辑（How）
/// 1. 检查上下文未关闭、未持有 TLS 状态，计算本次握手的优先级策略
///    （多流时收窄到 TLS1.2，使派生会话可以在握手中按会话标识恢复）；
/// 2. 依次执行创建会话、应用策略、加载凭据、（服务端）强制要求对端证书、绑定字节流；
/// 3. 在可选时限内执行协商，随后读取校验结论，空位图才算 `Verified`；
/// 4. 成功时把主会话（及派生会话）一次性绑定进上下文；失败时 TCP 字节流交还上下文，
///    由 `close` 唯一一次释放。
///
/// ## 契约（What）
/// - 返回 `Ok(())` 当且仅当上下文进入 `Verified` 并持有完整 TLS 状态；
/// - 每次状态迁移与失败都会报告给 [`DiagnosticsSink`]。
pub struct HandshakeEngine<B, D = TracingDiagnostics> {
    backend: B,
    diagnostics: D,
    stream_io: StreamIoConfig,
}

impl<B: TlsBackend> HandshakeEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_diagnostics(backend, TracingDiagnostics)
    }
}

impl<B, D> HandshakeEngine<B, D>
where
    B: TlsBackend,
    D: DiagnosticsSink,
{
    pub fn with_diagnostics(backend: B, diagnostics: D) -> Self {
        Self {
            backend,
            diagnostics,
            stream_io: StreamIoConfig::default(),
        }
    }

    /// 调整 SCTP 流适配器的缓冲参数。
    pub fn with_stream_io(mut self, config: StreamIoConfig) -> Self {
        self.stream_io = config;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    pub async fn handshake(
        &self,
        ctx: &mut ConnectionContext<B::Session>,
        role: Role,
        security: &SecurityConfig,
    ) -> Result<()> {
        if ctx.is_closed() {
            return Err(CnxError::invalid_argument(format!(
                "{}: handshake on a closed connection",
                ctx.socket_id()
            )));
        }
        if ctx.has_tls_state() {
            return Err(CnxError::invalid_argument(format!(
                "{}: connection is already secured",
                ctx.socket_id()
            )));
        }

        ctx.begin_handshake(role);
        let socket_id = ctx.socket_id().to_owned();
        let mut attempt = Attempt::new(
            &self.diagnostics,
            &socket_id,
            ctx.first_peer(),
            role,
            None,
        );

        let multi_stream = ctx.is_multi_stream();
        let (plan, master_io) = match self.plan(ctx, role, security, multi_stream) {
            Ok(planned) => planned,
            Err(error) => {
                let error = attempt.abort(error, None).error;
                ctx.set_state(attempt.state);
                return Err(error);
            }
        };

        let outcome = drive(&self.backend, &plan, security, master_io, None, &mut attempt).await;
        let mut master = match outcome {
            Ok(session) => session,
            Err(Aborted { error, io }) => {
                if let Some(io) = io
                    && !multi_stream
                {
                    ctx.restore_stream(io);
                }
                ctx.set_state(attempt.state);
                return Err(error);
            }
        };

        let Some(association) = plan.association.clone() else {
            ctx.bind_tls(master, Vec::new());
            ctx.set_state(HandshakeState::Verified);
            return Ok(());
        };

        // 主会话的 0 号流适配器让给派生会话，主会话只保留恢复参数。
        drop(master.release_io());
        let target = coordinator::StreamTarget {
            association,
            socket_id: &socket_id,
            peer: ctx.first_peer(),
            pairs: ctx.pairs(),
            stream_io: self.stream_io,
        };
        let derived = coordinator::bootstrap_streams(
            &self.backend,
            &self.diagnostics,
            &plan,
            security,
            &master,
            &target,
        )
        .await;
        match derived {
            Ok(streams) => {
                ctx.bind_tls(master, streams);
                ctx.set_state(HandshakeState::Verified);
                Ok(())
            }
            Err(error) => {
                drop(master);
                ctx.set_state(HandshakeState::Failed);
                Err(error)
            }
        }
    }

    fn plan(
        &self,
        ctx: &mut ConnectionContext<B::Session>,
        role: Role,
        security: &SecurityConfig,
        multi_stream: bool,
    ) -> Result<(Plan, BoxedByteStream)> {
        let peer_name = match (role, ctx.tls_peer_name()) {
            (_, Some(name)) => name,
            (Role::Server, None) => String::new(),
            (Role::Client, None) => {
                return Err(CnxError::invalid_argument(format!(
                    "{}: no peer hostname or remote address to present as server name",
                    ctx.socket_id()
                )));
            }
        };

        let policy = if multi_stream {
            security.priority().restricted_to(TlsVersion::Tls12)?
        } else {
            security.priority().clone()
        };

        if multi_stream {
            let association = ctx.association().ok_or_else(|| {
                CnxError::invalid_argument("multi-stream connection without an association")
            })?;
            let master_io: BoxedByteStream = Box::new(SctpStreamIo::new(
                Arc::clone(&association),
                0,
                self.stream_io,
            ));
            let plan = Plan {
                role,
                policy,
                peer_name,
                association: Some(association),
            };
            return Ok((plan, master_io));
        }

        if let Some(params) = ctx.sctp_params() {
            return Err(CnxError::invalid_argument(format!(
                "{}: association has no usable stream pairs (inbound {}, outbound {})",
                ctx.socket_id(),
                params.inbound(),
                params.outbound()
            )));
        }
        let master_io = ctx.take_stream().ok_or_else(|| {
            CnxError::invalid_argument(format!(
                "{}: transport handle is no longer available",
                ctx.socket_id()
            ))
        })?;
        let plan = Plan {
            role,
            policy,
            peer_name,
            association: None,
        };
        Ok((plan, master_io))
    }
}

/// 一次握手的不变输入。
pub(crate) struct Plan {
    pub(crate) role: Role,
    pub(crate) policy: PriorityPolicy,
    pub(crate) peer_name: String,
    association: Option<Arc<dyn SctpAssociation>>,
}

/// 单条会话的状态追踪与诊断上报。
pub(crate) struct Attempt<'a, D: ?Sized> {
    pub(crate) diagnostics: &'a D,
    pub(crate) report: HandshakeReport<'a>,
    pub(crate) state: HandshakeState,
}

pub(crate) struct Aborted {
    pub(crate) error: CnxError,
    pub(crate) io: Option<BoxedByteStream>,
}

impl<'a, D: DiagnosticsSink + ?Sized> Attempt<'a, D> {
    pub(crate) fn new(
        diagnostics: &'a D,
        socket_id: &'a str,
        peer: Option<SocketAddr>,
        role: Role,
        stream: Option<u16>,
    ) -> Self {
        Self {
            diagnostics,
            report: HandshakeReport {
                socket_id,
                peer,
                role,
                stream,
            },
            state: HandshakeState::Init,
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal handshake transition {} -> {}",
            self.state,
            next
        );
        self.diagnostics.state_changed(&self.report, self.state, next);
        self.state = next;
    }

    fn abort(&mut self, error: CnxError, io: Option<BoxedByteStream>) -> Aborted {
        let terminal = match &error {
            CnxError::PeerRejected { .. } => HandshakeState::Rejected,
            _ if self.state == HandshakeState::Negotiated => HandshakeState::Rejected,
            _ => HandshakeState::Failed,
        };
        self.advance(terminal);
        self.diagnostics
            .handshake_failed(&self.report, terminal, &error);
        Aborted { error, io }
    }
}

/// 在一条字节流上把会话推进到 `Verified`。
///
/// `resume` 为 `Some` 时是派生会话：必须按主会话参数恢复，完成了完整握手同样视为失败。
pub(crate) async fn drive<B, D>(
    backend: &B,
    plan: &Plan,
    security: &SecurityConfig,
    io: BoxedByteStream,
    resume: Option<&<B::Session as TlsSession>::Resumption>,
    attempt: &mut Attempt<'_, D>,
) -> Result<B::Session, Aborted>
where
    B: TlsBackend,
    D: DiagnosticsSink + ?Sized,
{
    let mut session = match backend.create_session(plan.role) {
        Ok(session) => session,
        Err(error) => return Err(attempt.abort(error, Some(io))),
    };
    attempt.advance(HandshakeState::SessionCreated);

    if let Err(error) = session.configure(&plan.policy) {
        return Err(attempt.abort(error, Some(io)));
    }
    attempt.advance(HandshakeState::Configured);

    if let Err(error) = session.set_credentials(security.credentials()) {
        return Err(attempt.abort(error, Some(io)));
    }
    attempt.advance(HandshakeState::Credentialed);

    if plan.role == Role::Server
        && let Err(error) = session.require_peer_certificate()
    {
        return Err(attempt.abort(error, Some(io)));
    }
    if let Some(params) = resume
        && let Err(error) = session.resume_from(params)
    {
        return Err(attempt.abort(error, Some(io)));
    }
    if let Err(error) = session.bind_io(io, &plan.peer_name) {
        let io = session.release_io();
        return Err(attempt.abort(error, io));
    }

    attempt.advance(HandshakeState::Negotiating);
    let negotiated = run_with_timeout(security.handshake_timeout(), session.handshake()).await;
    if let Err(reason) = negotiated {
        let io = session.release_io();
        return Err(attempt.abort(CnxError::handshake(reason), io));
    }
    if resume.is_some() && !session.is_resumed() {
        let stream = attempt.report.stream.unwrap_or(0);
        let io = session.release_io();
        return Err(attempt.abort(
            CnxError::handshake(HandshakeFailure::ResumptionRefused { stream }),
            io,
        ));
    }
    attempt.advance(HandshakeState::Negotiated);

    match session.verify_peer() {
        Ok(reasons) if reasons.is_empty() => {
            attempt.advance(HandshakeState::Verified);
            attempt
                .diagnostics
                .handshake_completed(&attempt.report, session.is_resumed());
            Ok(session)
        }
        Ok(reasons) => {
            let io = session.release_io();
            Err(attempt.abort(CnxError::rejected(reasons), io))
        }
        Err(error) => {
            let io = session.release_io();
            Err(attempt.abort(error, io))
        }
    }
}
