#![doc = r#"
# diameter-cnx

## 设计动机（Why）
- **定位**：Diameter 对等端的连接建立与传输安全层，负责把调用方交来的已连接句柄
  升级为经过双向认证的加密通道；
- **多流扩展**：SCTP 关联的每条流各自承载一条 TLS 会话，全部由一次主握手派生；
- **可运维性**：握手的每一步状态、每一项证书拒绝原因都经由诊断出口输出。

## 核心契约（What）
- [`ConnectionContext`]：接管句柄、记录端点与流参数、持有全部 TLS 会话，`close` 幂等；
- [`HandshakeEngine`]：执行 `Init → … → Verified` 状态机，对端证书校验为强制项；
- [`SctpStreamIo`]：SCTP 单流消息与有序字节流之间的推拉适配器，带低水位；
- [`TlsBackend`] / [`TlsSession`]：TLS 实现的能力契约，默认实现为 [`RustlsBackend`]；
- [`DiagnosticsSink`]：握手失败与状态迁移的观察出口，默认 [`TracingDiagnostics`]。

## 实现策略（How）
- 安全配置是只读快照 [`SecurityConfig`]，每次握手显式传入；
- 握手失败时底层字节流交还上下文，由 `close` 唯一一次释放；
- 多流派生会话并发握手，任一失败即整体失败，返回流编号最小的错误。

## 风险与考量（Trade-offs）
- 派生会话必须恢复成功，否则失败关闭；对端不支持会话恢复时多流连接无法建立；
- 握手超时会连同握手 future 一起丢弃底层字节流。
"#]
#![cfg_attr(
    not(feature = "backend-rustls"),
    doc = r#"## 功能开关：`backend-rustls`

默认启用 rustls 后端；关闭后仅保留连接上下文、状态机与能力契约，需由调用方提供 `TlsBackend` 实现。
"#
)]

mod context;
mod coordinator;
mod diagnostics;
mod engine;
mod session;
mod stream_io;
mod transport;
mod util;

#[cfg(feature = "backend-rustls")]
mod backend;

pub use context::ConnectionContext;
pub use diagnostics::{DiagnosticsSink, HandshakeReport, TracingDiagnostics};
pub use engine::HandshakeEngine;
pub use session::{HandshakeState, Role, TlsBackend, TlsSession};
pub use stream_io::{
    DEFAULT_MAX_MESSAGE_SIZE, SctpStreamIo, StreamIoConfig, TLS_RECORD_HEADER_LEN,
};
pub use transport::{
    BoxedByteStream, ByteStream, Protocol, SctpAssociation, SctpStreamParams, TransportHandle,
};

pub use diameter_cnx_core::{
    CnxError, CredentialSet, ErrorCategory, HandshakeFailure, PriorityPolicy, RejectionReason,
    RejectionReasons, Result, SecurityClass, SecurityConfig, SecuritySettings, TlsVersion,
};

#[cfg(feature = "backend-rustls")]
pub use backend::{RustlsBackend, RustlsResumption, RustlsSession};

/// 基于 rustls 的连接上下文。
#[cfg(feature = "backend-rustls")]
pub type TlsConnectionContext = ConnectionContext<RustlsSession>;

/// 基于 rustls 的握手引擎。
#[cfg(feature = "backend-rustls")]
pub type RustlsEngine<D = TracingDiagnostics> = HandshakeEngine<RustlsBackend, D>;
