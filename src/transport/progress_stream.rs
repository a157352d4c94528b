use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use super::types::ProgressReporter;

pin_project! {
    /// 统计已发送字节数并上报进度的请求体流
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        reporter: ProgressReporter,
        bytes_transferred: u64,
        total_bytes: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, reporter: ProgressReporter, initial_offset: u64, total_bytes: u64) -> Self {
        Self {
            inner,
            reporter,
            bytes_transferred: initial_offset,
            total_bytes,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_transferred += chunk.len() as u64;
                    this.reporter.report(*this.bytes_transferred, *this.total_bytes);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// 按固定大小切分
pub(crate) fn split_chunks(mut data: Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::with_capacity(data.len() / chunk_size + 1);

    while !data.is_empty() {
        let take = chunk_size.min(data.len());
        chunks.push(data.split_to(take));
    }

    chunks
}
