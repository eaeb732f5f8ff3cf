use std::{fmt, io};

use async_trait::async_trait;
use diameter_cnx_core::{
    CredentialSet, HandshakeFailure, PriorityPolicy, RejectionReasons, Result,
};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::transport::BoxedByteStream;

/// 本端在 TLS 握手中的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次握手的状态机。
///
/// ```text
/// Init → SessionCreated → Configured → Credentialed → Negotiating → Negotiated → Verified
///   └────────────┴─────────────┴────────────┴─────────────┴→ Failed      └──────→ Rejected
/// ```
///
/// - `Verified` 是唯一的成功终态；
/// - `Negotiating` 在一次调用内只进入一次，失败不重试。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Init,
    SessionCreated,
    Configured,
    Credentialed,
    Negotiating,
    Negotiated,
    Failed,
    Verified,
    Rejected,
}

impl HandshakeState {
    pub fn can_transition_to(self, next: HandshakeState) -> bool {
        use HandshakeState::*;
        matches!(
            (self, next),
            (Init, SessionCreated)
                | (SessionCreated, Configured)
                | (Configured, Credentialed)
                | (Credentialed, Negotiating)
                | (Negotiating, Negotiated)
                | (Negotiated, Verified)
                | (Negotiated, Rejected)
                | (Init | SessionCreated | Configured | Credentialed | Negotiating, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandshakeState::Failed | HandshakeState::Verified | HandshakeState::Rejected
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            HandshakeState::Init => "init",
            HandshakeState::SessionCreated => "session_created",
            HandshakeState::Configured => "configured",
            HandshakeState::Credentialed => "credentialed",
            HandshakeState::Negotiating => "negotiating",
            HandshakeState::Negotiated => "negotiated",
            HandshakeState::Failed => "failed",
            HandshakeState::Verified => "verified",
            HandshakeState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TLS 实现的工厂。
pub trait TlsBackend: Send + Sync {
    type Session: TlsSession;

    fn create_session(&self, role: Role) -> Result<Self::Session>;
}

/// 单条 TLS 会话的能力契约。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手引擎与多流协调器只依赖这组能力，不直接触碰 TLS 库对象；
///   生产环境由 rustls 后端实现，契约测试使用脚本化实现；
/// - 会话本身就是握手完成后的加密字节流（`AsyncRead + AsyncWrite`），外部分帧层直接读写。
///
/// ## 契约（What）
/// - 调用顺序：`configure` → `set_credentials` → （服务端）`require_peer_certificate` →
///   （派生会话）`resume_from` → `bind_io` → `handshake` → `verify_peer`；
/// - `configure` / `set_credentials` 的失败都是部署问题，返回 `InvalidConfig`；
/// - `handshake` 只在协商失败时返回 [`HandshakeFailure`]，对端证书不合格**不**让它失败，
///   校验结论通过 `verify_peer` 取得；空位图即通过，未经校验的会话返回非空位图；
/// - `release_io` 交还尚未被消费的底层字节流（未握手、握手失败后可回收，或已建立会话拆解），
///   随后会话不再可读写；
/// - `shutdown` 发送 `close_notify`，对未建立的会话是空操作。
#[async_trait]
pub trait TlsSession: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// 派生会话据以恢复的主会话参数。
    type Resumption: Send + Sync + 'static;

    fn role(&self) -> Role;

    fn configure(&mut self, policy: &PriorityPolicy) -> Result<()>;

    fn set_credentials(&mut self, credentials: &CredentialSet) -> Result<()>;

    fn require_peer_certificate(&mut self) -> Result<()>;

    /// 绑定底层字节流；`peer_name` 是客户端出示给服务端的身份（主机名或地址）。
    fn bind_io(&mut self, io: BoxedByteStream, peer_name: &str) -> Result<()>;

    fn resume_from(&mut self, params: &Self::Resumption) -> Result<()>;

    async fn handshake(&mut self) -> core::result::Result<(), HandshakeFailure>;

    fn verify_peer(&self) -> Result<RejectionReasons>;

    fn is_resumed(&self) -> bool;

    fn resumption_params(&self) -> Option<Self::Resumption>;

    fn release_io(&mut self) -> Option<BoxedByteStream>;

    async fn shutdown(&mut self) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::HandshakeState::{self, *};

    const ALL: [HandshakeState; 9] = [
        Init,
        SessionCreated,
        Configured,
        Credentialed,
        Negotiating,
        Negotiated,
        Failed,
        Verified,
        Rejected,
    ];

    #[test]
    fn terminal_states_have_no_exit() {
        for from in ALL.into_iter().filter(|state| state.is_terminal()) {
            assert!(ALL.iter().all(|to| !from.can_transition_to(*to)), "{from}");
        }
    }

    #[test]
    fn verification_only_follows_negotiation() {
        let into_verified: Vec<_> = ALL
            .into_iter()
            .filter(|from| from.can_transition_to(Verified))
            .collect();
        assert_eq!(into_verified, vec![Negotiated]);
        assert!(!Negotiated.can_transition_to(Failed));
        assert!(!Negotiated.can_transition_to(Negotiating));
    }

    #[test]
    fn configuration_steps_may_fail() {
        for from in [Init, SessionCreated, Configured, Credentialed, Negotiating] {
            assert!(from.can_transition_to(Failed), "{from}");
        }
    }
}
