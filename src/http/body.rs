//! Response bodies that keep per-request state alive until delivery ends.
//!
//! A handler returning its response head is not the end of the request: the
//! backend may still be streaming the body. Admission permits and activity
//! guards ride inside the body and are released once the last frame has been
//! produced, the body fails, or the body is dropped (client gone).

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::BoxError;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

/// Wraps a body and drops `guard` when the body is finished.
pub struct GuardedBody<G> {
    inner: Body,
    guard: Option<G>,
}

impl<G> GuardedBody<G>
where
    G: Send + Unpin + 'static,
{
    /// Tie `guard` to `body`, returning a type-erased body.
    ///
    /// A body that is already complete releases the guard immediately.
    pub fn wrap<B>(body: B, guard: G) -> Body
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let inner = Body::new(body);
        let guard = (!inner.is_end_stream()).then_some(guard);
        Body::new(Self { inner, guard })
    }

    fn release(&mut self) {
        self.guard.take();
    }
}

impl<G> HttpBody for GuardedBody<G>
where
    G: Send + Unpin + 'static,
{
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.release(),
            Poll::Ready(Some(Ok(_))) if this.inner.is_end_stream() => this.release(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Tally(Arc<AtomicUsize>);

    impl Drop for Tally {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn channel_body() -> (mpsc::Sender<&'static str>, Body) {
        let (tx, rx) = mpsc::channel(4);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|chunk: &'static str| (Ok::<_, Infallible>(Bytes::from_static(chunk.as_bytes())), rx))
        });
        (tx, Body::from_stream(stream))
    }

    #[tokio::test]
    async fn test_guard_held_until_body_ends() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, body) = channel_body();
        let mut body = GuardedBody::wrap(body, Tally(released.clone()));

        tx.send("hel").await.unwrap();
        let frame = std::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame.into_data().unwrap(), "hel");
        assert_eq!(released.load(Ordering::SeqCst), 0);

        tx.send("lo").await.unwrap();
        drop(tx);
        let rest = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(rest, "lo");
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_guard_released_when_body_dropped() {
        let released = Arc::new(AtomicUsize::new(0));
        let (_tx, body) = channel_body();
        let body = GuardedBody::wrap(body, Tally(released.clone()));

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(body);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_body_releases_immediately() {
        let released = Arc::new(AtomicUsize::new(0));
        let body = GuardedBody::wrap(Body::empty(), Tally(released.clone()));

        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(body.is_end_stream());
    }
}
