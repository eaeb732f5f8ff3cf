use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::transport::SctpAssociation;

/// TLS 记录头长度，也是默认的入站低水位。
pub const TLS_RECORD_HEADER_LEN: usize = 5;

/// 单条 SCTP 消息的默认上限：一条最大 TLS 记录加上加密开销。
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 + 2048;

/// [`SctpStreamIo`] 的缓冲参数。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamIoConfig {
    low_water_mark: usize,
    max_message_size: usize,
}

impl Default for StreamIoConfig {
    fn default() -> Self {
        Self {
            low_water_mark: TLS_RECORD_HEADER_LEN,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl StreamIoConfig {
    pub fn with_low_water_mark(mut self, bytes: usize) -> Self {
        self.low_water_mark = bytes;
        self
    }

    /// 设置单条出站消息上限，最小为 1 字节。
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes.max(1);
        self
    }

    pub fn low_water_mark(&self) -> usize {
        self.low_water_mark
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

/// 把 SCTP 单流上的离散消息适配为有序字节流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - TLS 实现只认识字节流，而 SCTP 以消息为单位收发；每条流各自需要一个适配器，
///   让独立的 TLS 会话绑定到独立的流上；
/// - 入站侧设置低水位：缓冲不足一个 TLS 记录头时，继续拉取已经到达的消息，
///   减少 TLS 层因半个记录头而空转的次数。
///
/// ## 逻辑（How）
/// - 出站：`poll_write` 只追加到缓冲，`poll_flush` 或缓冲达到 `max_message_size`
///   时把整段缓冲作为一条消息推送；
/// - 入站：缓冲为空时等待下一条消息；拿到数据后，只要缓冲少于低水位且关联上
///   **立即**有消息可取，就继续拉取，关联返回 `Pending` 即停止并交付已有数据。
///
/// ## 契约（What）
/// - 空消息会被跳过，不会被误判为流结束；
/// - 关联报告流结束后，缓冲读尽即返回 EOF；
/// - 低水位拉取过程中遇到的 I/O 错误会在已缓冲数据交付后的下一次读取时返回。
pub struct SctpStreamIo {
    association: Arc<dyn SctpAssociation>,
    stream: u16,
    config: StreamIoConfig,
    inbound: BytesMut,
    outbound: BytesMut,
    deferred_error: Option<io::Error>,
    eof: bool,
}

impl SctpStreamIo {
    pub fn new(association: Arc<dyn SctpAssociation>, stream: u16, config: StreamIoConfig) -> Self {
        Self {
            association,
            stream,
            config,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            deferred_error: None,
            eof: false,
        }
    }

    pub fn stream_id(&self) -> u16 {
        self.stream
    }

    pub fn config(&self) -> &StreamIoConfig {
        &self.config
    }

    fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.inbound.is_empty() && !self.eof {
            match ready!(self.association.poll_recv(cx, self.stream))? {
                Some(message) => self.inbound.extend_from_slice(&message),
                None => self.eof = true,
            }
        }

        while !self.eof && self.inbound.len() < self.config.low_water_mark {
            match self.association.poll_recv(cx, self.stream) {
                Poll::Ready(Ok(Some(message))) => self.inbound.extend_from_slice(&message),
                Poll::Ready(Ok(None)) => self.eof = true,
                Poll::Ready(Err(err)) => {
                    self.deferred_error = Some(err);
                    break;
                }
                Poll::Pending => break,
            }
        }
        Poll::Ready(Ok(()))
    }

    fn poll_push(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.outbound.is_empty() {
            return Poll::Ready(Ok(()));
        }
        ready!(
            self.association
                .poll_send(cx, self.stream, self.outbound.chunk())
        )?;
        self.outbound.clear();
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for SctpStreamIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.inbound.is_empty()
            && let Some(err) = this.deferred_error.take()
        {
            return Poll::Ready(Err(err));
        }
        ready!(this.poll_fill(cx))?;

        let n = buf.remaining().min(this.inbound.len());
        buf.put_slice(&this.inbound.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SctpStreamIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.outbound.len() >= this.config.max_message_size {
            ready!(this.poll_push(cx))?;
        }
        let room = this.config.max_message_size - this.outbound.len();
        let n = data.len().min(room);
        this.outbound.extend_from_slice(&data[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_push(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_push(cx)
    }
}
