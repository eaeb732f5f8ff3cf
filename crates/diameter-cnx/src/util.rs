use std::{future::Future, time::Duration};

use diameter_cnx_core::HandshakeFailure;

/// 为握手协商施加可选的截止时间。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协商阶段等待对端报文，恶意或失联的对端会让握手无限挂起；
///   把时限集中在这里，引擎与协调器只需包一层调用。
///
/// ## 契约（What）
/// - `limit` 为 `None` 时原样等待 `future`；
/// - 超时返回 [`HandshakeFailure::TimedOut`]，`future` 随即被丢弃，
///   其中持有的底层字节流也一并释放，调用方不得再尝试回收。
pub(crate) async fn run_with_timeout<F, T>(
    limit: Option<Duration>,
    future: F,
) -> Result<T, HandshakeFailure>
where
    F: Future<Output = Result<T, HandshakeFailure>>,
{
    let Some(limit) = limit else {
        return future.await;
    };
    match tokio::time::timeout(limit, future).await {
        Ok(outcome) => outcome,
        Err(_) => Err(HandshakeFailure::TimedOut(limit)),
    }
}
