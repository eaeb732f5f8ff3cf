//! rustls + tokio-rustls 实现的 TLS 后端。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把 [`TlsBackend`] / [`TlsSession`](crate::TlsSession) 契约落到 rustls 上：
//!   证书校验以“记录子原因”的方式执行，握手以可回收字节流的方式执行；
//! - 每个后端实例持有一个基础 `CryptoProvider`，会话按优先级策略从中筛选套件，
//!   不依赖进程级默认 provider 的安装。
//!
//! ## 风险与权衡（Trade-offs）
//! - 套件名称按 rustls 的 `CipherSuite` 调试名匹配（例如
//!   `TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256`），与 IANA 名称一致；
//! - 多流场景依赖 TLS1.2 会话标识恢复，TLS1.3 票据恢复在握手流程上无法满足“派生会话必须恢复”。

mod error;
mod session;
mod verifier;

use std::sync::Arc;

use diameter_cnx_core::Result;
use rustls::crypto::CryptoProvider;

pub use session::{RustlsResumption, RustlsSession};

use crate::session::{Role, TlsBackend};

/// rustls 后端，默认使用 aws-lc-rs 加密实现。
#[derive(Clone, Debug)]
pub struct RustlsBackend {
    provider: Arc<CryptoProvider>,
}

impl RustlsBackend {
    pub fn new() -> Self {
        Self::with_provider(rustls::crypto::aws_lc_rs::default_provider())
    }

    pub fn with_provider(provider: CryptoProvider) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }
}

impl Default for RustlsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsBackend for RustlsBackend {
    type Session = RustlsSession;

    fn create_session(&self, role: Role) -> Result<RustlsSession> {
        Ok(RustlsSession::new(role, Arc::clone(&self.provider)))
    }
}
