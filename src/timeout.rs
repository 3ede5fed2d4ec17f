//! Idle-timeout enforcement on the transport stream.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

pin_project! {
    /// Wraps a stream so that a read or a write which makes no progress for
    /// the configured duration fails with `ErrorKind::TimedOut`. Each
    /// direction keeps its own deadline and rearms it on progress.
    pub(crate) struct IdleTimeout<T> {
        #[pin]
        inner: T,
        timeout: Duration,
        #[pin]
        read_deadline: Sleep,
        #[pin]
        write_deadline: Sleep,
    }
}

impl<T> IdleTimeout<T> {
    pub(crate) fn new(inner: T, timeout: Duration) -> IdleTimeout<T> {
        IdleTimeout {
            inner,
            timeout,
            read_deadline: sleep(timeout),
            write_deadline: sleep(timeout),
        }
    }
}

fn timed_out(direction: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} idle timeout expired", direction),
    )
}

impl<T: AsyncRead> AsyncRead for IdleTimeout<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline.reset(Instant::now() + *this.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.read_deadline.poll(cx).is_ready() {
                    return Poll::Ready(Err(timed_out("read")));
                }
                Poll::Pending
            }
        }
    }
}

impl<T: AsyncWrite> AsyncWrite for IdleTimeout<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline.reset(Instant::now() + *this.timeout);
                Poll::Ready(result)
            }
            Poll::Pending => {
                if this.write_deadline.poll(cx).is_ready() {
                    return Poll::Ready(Err(timed_out("write")));
                }
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
