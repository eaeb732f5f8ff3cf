use std::{net::SocketAddr, sync::Arc};

use diameter_cnx_core::CnxError;

use crate::session::{HandshakeState, Role};

/// 一次握手尝试的身份信息。
#[derive(Clone, Copy, Debug)]
pub struct HandshakeReport<'a> {
    pub socket_id: &'a str,
    pub peer: Option<SocketAddr>,
    pub role: Role,
    /// 派生会话所在的 SCTP 流；主会话为 `None`。
    pub stream: Option<u16>,
}

/// 握手诊断出口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手失败必须能被运维定位：哪条连接、哪个角色、哪条流、停在哪个状态、具体哪几项证书问题；
/// - 诊断是纯观察行为，不影响握手结果，因此所有方法都有空默认实现，
///   调用方只覆盖关心的事件。
///
/// ## 契约（What）
/// - `state_changed`：每一次合法的状态迁移；
/// - `handshake_failed`：进入 `Failed` 或 `Rejected` 时调用一次，`error` 携带拒绝子原因；
/// - `handshake_completed`：会话达到 `Verified`。
pub trait DiagnosticsSink: Send + Sync {
    fn state_changed(&self, report: &HandshakeReport<'_>, from: HandshakeState, to: HandshakeState) {
        let _ = (report, from, to);
    }

    fn handshake_failed(&self, report: &HandshakeReport<'_>, state: HandshakeState, error: &CnxError) {
        let _ = (report, state, error);
    }

    fn handshake_completed(&self, report: &HandshakeReport<'_>, resumed: bool) {
        let _ = (report, resumed);
    }
}

impl<D> DiagnosticsSink for Arc<D>
where
    D: DiagnosticsSink + ?Sized,
{
    fn state_changed(&self, report: &HandshakeReport<'_>, from: HandshakeState, to: HandshakeState) {
        (**self).state_changed(report, from, to);
    }

    fn handshake_failed(&self, report: &HandshakeReport<'_>, state: HandshakeState, error: &CnxError) {
        (**self).handshake_failed(report, state, error);
    }

    fn handshake_completed(&self, report: &HandshakeReport<'_>, resumed: bool) {
        (**self).handshake_completed(report, resumed);
    }
}

/// 默认诊断实现：通过 `tracing` 输出事件，不安装任何订阅者。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn state_changed(&self, report: &HandshakeReport<'_>, from: HandshakeState, to: HandshakeState) {
        tracing::trace!(
            socket = report.socket_id,
            role = %report.role,
            stream = ?report.stream,
            from = %from,
            to = %to,
            "tls handshake state changed"
        );
    }

    fn handshake_failed(&self, report: &HandshakeReport<'_>, state: HandshakeState, error: &CnxError) {
        tracing::info!(
            socket = report.socket_id,
            peer = ?report.peer,
            role = %report.role,
            stream = ?report.stream,
            state = %state,
            code = error.code(),
            error = %error,
            "tls handshake failed"
        );
        for reason in error.rejection_reasons().iter() {
            tracing::info!(
                socket = report.socket_id,
                reason = reason.as_str(),
                " - {}",
                reason.description()
            );
        }
    }

    fn handshake_completed(&self, report: &HandshakeReport<'_>, resumed: bool) {
        tracing::debug!(
            socket = report.socket_id,
            peer = ?report.peer,
            role = %report.role,
            stream = ?report.stream,
            resumed,
            "tls session verified"
        );
    }
}
