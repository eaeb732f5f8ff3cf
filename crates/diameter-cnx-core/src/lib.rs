#![doc = r#"
# diameter-cnx-core

## 设计动机（Why）
- **定位**：Diameter 对等端连接上下文的契约层，与具体运行时、TLS 库解耦；
- **架构角色**：为 `diameter-cnx` 的握手引擎、多流协调器与后端实现提供共享的错误分类、
  证书拒绝原因位图以及不可变的安全配置快照；
- **设计理念**：安全配置在进程内只加载一次并以只读快照传入每次握手，杜绝隐藏的全局查找。

## 核心契约（What）
- [`CnxError`]：`InvalidArgument` / `TransportQuery` / `InvalidConfig` / `HandshakeFailed` /
  `PeerRejected` 五类终态错误，附带稳定错误码与 [`ErrorCategory`]；
- [`RejectionReasons`]：证书校验的五种拒绝子原因，任意非空组合都代表拒绝；
- [`SecurityConfig`]：优先级策略、本端证书与私钥、信任锚与 CRL 的只读快照，
  可通过 [`SecuritySettings`]（TOML）加载。

## 风险与考量（Trade-offs）
- 优先级策略只保存名称，真正的解析推迟到后端 `configure` 阶段，
  以便同一份配置可被不同 TLS 实现消费；代价是拼写错误要到首次握手才会暴露。
"#]

pub mod config;
pub mod error;
pub mod verify;

pub use config::{
    CredentialSet, PriorityPolicy, PrioritySettings, SecurityConfig, SecuritySettings, TlsVersion,
};
pub use error::{CnxError, ErrorCategory, HandshakeFailure, SecurityClass};
pub use verify::{RejectionReason, RejectionReasons};

/// 统一的结果别名。
pub type Result<T, E = CnxError> = core::result::Result<T, E>;
