//! SCTP 多流会话协调。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 多流 SCTP 关联上每条流都要有独立的 TLS 会话，但完整握手 N 次代价高昂，
//!   因此只在 0 号流上完成一次主握手，其余会话按主会话的会话标识恢复；
//! - 恢复被拒绝意味着对端没有把这些流与主会话视为同一身份，继续使用会削弱
//!   “整条连接只认证一次”的前提，因此一律失败关闭。
//!
//! ## 逻辑（How）
//! 1. 从已通过校验的主会话取出恢复参数；
//! 2. 对 `0..pairs` 每条流创建独立的 [`SctpStreamIo`]，并发执行与主会话相同的
//!    配置/凭据步骤，再 `resume_from` 后握手；
//! 3. 汇总结果：全部成功才返回会话列表，否则返回流编号最小的那个错误，
//!    已建立的派生会话随列表一起丢弃。
//!
//! ## 契约（What）
//! - 每条失败的流都已经通过诊断出口单独报告；
//! - 协商阶段的失败包装为 `HandshakeFailure::Stream { stream, .. }`，
//!   恢复被拒为 `HandshakeFailure::ResumptionRefused { stream }`。

use std::{net::SocketAddr, sync::Arc};

use diameter_cnx_core::{CnxError, HandshakeFailure, Result, SecurityConfig};
use futures_util::future::join_all;

use crate::{
    diagnostics::DiagnosticsSink,
    engine::{Attempt, Plan, drive},
    session::{TlsBackend, TlsSession},
    stream_io::{SctpStreamIo, StreamIoConfig},
    transport::{BoxedByteStream, SctpAssociation},
};

/// 派生会话所在的关联与标识。
pub(crate) struct StreamTarget<'a> {
    pub(crate) association: Arc<dyn SctpAssociation>,
    pub(crate) socket_id: &'a str,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) pairs: u16,
    pub(crate) stream_io: StreamIoConfig,
}

pub(crate) async fn bootstrap_streams<B, D>(
    backend: &B,
    diagnostics: &D,
    plan: &Plan,
    security: &SecurityConfig,
    master: &B::Session,
    target: &StreamTarget<'_>,
) -> Result<Vec<(u16, B::Session)>>
where
    B: TlsBackend,
    D: DiagnosticsSink,
{
    let params = master.resumption_params().ok_or_else(|| {
        CnxError::invalid_argument(format!(
            "{}: master session exposes no resumption parameters",
            target.socket_id
        ))
    })?;

    let attempts = (0..target.pairs).map(|stream| {
        let params = &params;
        async move {
            let io: BoxedByteStream = Box::new(SctpStreamIo::new(
                Arc::clone(&target.association),
                stream,
                target.stream_io,
            ));
            let mut attempt = Attempt::new(
                diagnostics,
                target.socket_id,
                target.peer,
                plan.role,
                Some(stream),
            );
            let outcome = drive(backend, plan, security, io, Some(params), &mut attempt).await;
            (stream, outcome.map_err(|aborted| aborted.error))
        }
    });
    let results = join_all(attempts).await;

    let mut sessions = Vec::with_capacity(usize::from(target.pairs));
    let mut first_error = None;
    let mut failed = 0usize;
    for (stream, result) in results {
        match result {
            Ok(session) => sessions.push((stream, session)),
            Err(error) => {
                failed += 1;
                if first_error.is_none() {
                    first_error = Some(attribute_to_stream(stream, error));
                }
            }
        }
    }

    match first_error {
        Some(error) => {
            tracing::debug!(
                socket = target.socket_id,
                failed,
                discarded = sessions.len(),
                "derived tls sessions abandoned"
            );
            Err(error)
        }
        None => {
            tracing::debug!(
                socket = target.socket_id,
                streams = sessions.len(),
                "derived tls sessions resumed"
            );
            Ok(sessions)
        }
    }
}

fn attribute_to_stream(stream: u16, error: CnxError) -> CnxError {
    match error {
        CnxError::HandshakeFailed { reason } if reason.stream().is_none() => {
            CnxError::handshake(HandshakeFailure::Stream {
                stream,
                cause: Box::new(reason),
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn negotiation_failures_carry_their_stream() {
        let error = attribute_to_stream(
            2,
            CnxError::handshake(HandshakeFailure::TimedOut(Duration::from_secs(1))),
        );
        let CnxError::HandshakeFailed { reason } = error else {
            panic!("unexpected error kind");
        };
        assert_eq!(reason.stream(), Some(2));
        assert!(matches!(reason.root(), HandshakeFailure::TimedOut(_)));
    }

    #[test]
    fn refused_resumption_is_not_wrapped_twice() {
        let error = attribute_to_stream(
            1,
            CnxError::handshake(HandshakeFailure::ResumptionRefused { stream: 1 }),
        );
        assert!(matches!(
            error,
            CnxError::HandshakeFailed {
                reason: HandshakeFailure::ResumptionRefused { stream: 1 }
            }
        ));
    }
}
