//! Mock gRPC upstream: an HTTP/2-cleartext server answering every path with
//! one fixed framed message and OK trailers.

use axum::{body::Body, response::Response, Router};
use chaingate_core::grpc::{body::GrpcReplyBody, channel::encode_frame};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

pub struct GrpcMockServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl GrpcMockServer {
    /// Starts the mock on an ephemeral port, replying with `message` (raw
    /// protobuf bytes, framed on the wire) to every call.
    pub async fn start(message: Vec<u8>) -> Self {
        let app = Router::new().fallback(move || {
            let framed = encode_frame(&message);
            async move {
                Response::builder()
                    .status(http::StatusCode::OK)
                    .header(http::header::CONTENT_TYPE, "application/grpc")
                    .body(Body::new(GrpcReplyBody::message(framed)))
                    .unwrap()
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, handle }
    }

    /// Target string (`host:port`) for channel construction.
    #[must_use]
    pub fn target(&self) -> String {
        self.addr.to_string()
    }
}

impl Drop for GrpcMockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
