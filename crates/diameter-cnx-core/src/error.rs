use std::{borrow::Cow, io, time::Duration};

use thiserror::Error;

use crate::verify::RejectionReasons;

/// 连接上下文与握手流程的错误类型。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把“调用方用错了”“部署配置坏了”“协商失败”“对端证书不合格”几类语义明确区分，
///   让拥有连接的对端管理器可以据此决定是否重连、是否告警；
/// - 每个变体都是**终态**：核心内部不做任何自动重试。
///
/// ## 契约（What）
/// - `InvalidArgument`：不支持的协议、句柄与协议不一致、对已关闭/已握手的上下文再次握手；
/// - `TransportQuery`：SCTP 流参数查询失败，句柄已在返回前释放；
/// - `InvalidConfig`：安全策略、证书或配置文件不合法，属于部署问题而非协议问题；
/// - `HandshakeFailed`：协商阶段失败（告警、版本不匹配、I/O 错误、超时、会话恢复被拒）；
/// - `PeerRejected`：协商成功但对端证书校验失败，`reasons` 至少包含一个子原因。
///
/// ## 风险与权衡（Trade-offs）
/// - `HandshakeFailure` 只保留分类与文字描述，不持有底层 `rustls::Error`，
///   以保持契约层与 TLS 实现解耦。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CnxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),
    #[error("transport query failed on {socket}: {source}")]
    TransportQuery {
        socket: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid security configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
    #[error("tls handshake failed: {reason}")]
    HandshakeFailed { reason: HandshakeFailure },
    #[error("peer certificate rejected: {reasons}")]
    PeerRejected { reasons: RejectionReasons },
}

impl CnxError {
    pub fn invalid_argument(detail: impl Into<Cow<'static, str>>) -> Self {
        CnxError::InvalidArgument(detail.into())
    }

    pub fn invalid_config(detail: impl Into<Cow<'static, str>>) -> Self {
        CnxError::InvalidConfig(detail.into())
    }

    pub fn handshake(reason: HandshakeFailure) -> Self {
        CnxError::HandshakeFailed { reason }
    }

    /// 构造拒绝错误。空位图不是拒绝，调用方必须先行判断。
    pub fn rejected(reasons: RejectionReasons) -> Self {
        debug_assert!(!reasons.is_empty(), "empty rejection set is a success");
        CnxError::PeerRejected { reasons }
    }

    /// 稳定错误码，供日志检索与运维脚本匹配。
    pub fn code(&self) -> &'static str {
        match self {
            CnxError::InvalidArgument(_) => "diameter.cnx.invalid_argument",
            CnxError::TransportQuery { .. } => "diameter.cnx.transport_query_failed",
            CnxError::InvalidConfig(_) => "diameter.cnx.invalid_config",
            CnxError::HandshakeFailed { .. } => "diameter.cnx.handshake_failed",
            CnxError::PeerRejected { .. } => "diameter.cnx.peer_rejected",
        }
    }

    /// 错误分类，供对端管理器制定重连策略。
    pub fn category(&self) -> ErrorCategory {
        match self {
            CnxError::InvalidArgument(_) | CnxError::InvalidConfig(_) => {
                ErrorCategory::NonRetryable
            }
            CnxError::TransportQuery { .. } => ErrorCategory::Retryable,
            CnxError::HandshakeFailed { reason } => reason.category(),
            CnxError::PeerRejected { .. } => ErrorCategory::Security(SecurityClass::Authentication),
        }
    }

    /// 证书拒绝子原因；非 `PeerRejected` 时为空。
    pub fn rejection_reasons(&self) -> RejectionReasons {
        match self {
            CnxError::PeerRejected { reasons } => *reasons,
            _ => RejectionReasons::empty(),
        }
    }
}

/// 协商失败的具体原因。
///
/// # 契约（What）
/// - `Protocol`：报文或告警表明完整性/协议违规；
/// - `Authentication`：证书缺失、证书被对端拒绝等身份类问题；
/// - `Transient`：连接被重置、对端版本不兼容等可重连的问题；
/// - `TimedOut`：握手超过配置的时限；
/// - `ResumptionRefused`：派生流上的会话没有按主会话恢复；
/// - `Stream`：派生流上的失败，包装其原因并标注流编号。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum HandshakeFailure {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("authentication failure: {0}")]
    Authentication(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("peer refused session resumption on stream {stream}")]
    ResumptionRefused { stream: u16 },
    #[error("stream {stream}: {cause}")]
    Stream {
        stream: u16,
        cause: Box<HandshakeFailure>,
    },
}

impl HandshakeFailure {
    /// 失败发生的 SCTP 流编号；主会话失败时为 `None`。
    pub fn stream(&self) -> Option<u16> {
        match self {
            HandshakeFailure::ResumptionRefused { stream }
            | HandshakeFailure::Stream { stream, .. } => Some(*stream),
            _ => None,
        }
    }

    /// 去掉 `Stream` 包装后的根因。
    pub fn root(&self) -> &HandshakeFailure {
        match self {
            HandshakeFailure::Stream { cause, .. } => cause.root(),
            other => other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HandshakeFailure::Protocol(_) | HandshakeFailure::ResumptionRefused { .. } => {
                ErrorCategory::Security(SecurityClass::Integrity)
            }
            HandshakeFailure::Authentication(_) => {
                ErrorCategory::Security(SecurityClass::Authentication)
            }
            HandshakeFailure::Transient(_) => ErrorCategory::Retryable,
            HandshakeFailure::TimedOut(_) => ErrorCategory::Timeout,
            HandshakeFailure::Stream { cause, .. } => cause.category(),
        }
    }
}

/// 错误分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 调用方或部署问题，重试无意义。
    NonRetryable,
    /// 瞬时故障，对端管理器可按退避策略重连。
    Retryable,
    /// 超时。
    Timeout,
    /// 安全违规，需要告警而非盲目重连。
    Security(SecurityClass),
}

/// 安全违规的细分。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecurityClass {
    Integrity,
    Authentication,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_failures_keep_root_category() {
        let failure = HandshakeFailure::Stream {
            stream: 3,
            cause: Box::new(HandshakeFailure::Transient("connection reset".into())),
        };
        assert_eq!(failure.stream(), Some(3));
        assert_eq!(failure.category(), ErrorCategory::Retryable);
        assert!(matches!(failure.root(), HandshakeFailure::Transient(_)));
        assert_eq!(
            failure.to_string(),
            "stream 3: transient failure: connection reset"
        );
    }

    #[test]
    fn codes_are_stable() {
        let err = CnxError::rejected(RejectionReasons::REVOKED);
        assert_eq!(err.code(), "diameter.cnx.peer_rejected");
        assert_eq!(
            err.category(),
            ErrorCategory::Security(SecurityClass::Authentication)
        );
        assert_eq!(err.rejection_reasons(), RejectionReasons::REVOKED);
        assert_eq!(
            CnxError::invalid_config("bad suite").code(),
            "diameter.cnx.invalid_config"
        );
    }
}
