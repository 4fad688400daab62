//! Response bodies for the gRPC proxy.
//!
//! [`GrpcReplyBody`] emits one message frame followed by trailers, for the
//! locally served health endpoints. [`TraceBody`] wraps a forwarded upstream
//! body and emits the request trace once the gRPC status is known: at the
//! trailers frame, or at end-of-stream for upstreams that never send one.

use crate::proxy::trace::GrpcTraceBuilder;
use bytes::Bytes;
use http::HeaderMap;
use http_body::{Body, Frame};
use std::{
    pin::Pin,
    task::{ready, Context, Poll},
    time::Instant,
};

/// One data frame, then trailers carrying `grpc-status`.
pub struct GrpcReplyBody {
    message: Option<Bytes>,
    trailers: Option<HeaderMap>,
}

impl GrpcReplyBody {
    /// A successful reply carrying one framed message.
    #[must_use]
    pub fn message(framed: Vec<u8>) -> Self {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", http::HeaderValue::from_static("0"));
        Self { message: Some(Bytes::from(framed)), trailers: Some(trailers) }
    }
}

impl Body for GrpcReplyBody {
    type Data = Bytes;
    type Error = std::convert::Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(message) = self.message.take() {
            return Poll::Ready(Some(Ok(Frame::data(message))));
        }
        if let Some(trailers) = self.trailers.take() {
            return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
        }
        Poll::Ready(None)
    }
}

/// Pass-through body that emits the request trace when the stream settles.
pub struct TraceBody<B> {
    inner: B,
    builder: Option<GrpcTraceBuilder>,
    start: Instant,
}

impl<B> TraceBody<B> {
    pub fn new(inner: B, builder: GrpcTraceBuilder, start: Instant) -> Self {
        Self { inner, builder: Some(builder), start }
    }

    fn emit(&mut self, trailers: Option<&HeaderMap>) {
        let Some(builder) = self.builder.take() else { return };
        let (code, message) = trailers
            .and_then(crate::grpc::channel::read_grpc_status)
            .unwrap_or((0, "OK".to_string()));
        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = self.start.elapsed().as_millis() as i64;
        builder.with_response(latency_ms, code, &message).build().println();
    }
}

impl<B> Body for TraceBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    Self: Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.as_mut().get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match frame {
            Some(Ok(frame)) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.emit(Some(trailers));
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => {
                this.emit(None);
                Poll::Ready(None)
            }
        }
    }
}
