//! HTTP/2 channels to upstream gRPC nodes.
//!
//! gRPC calls are plain HTTP/2 POSTs with `application/grpc` bodies and
//! status carried in trailers, so a channel here is a pooling HTTP/2 client
//! pinned to one authority. TLS is chosen when the target authority carries
//! `:443`, mirroring how upstream node lists are written; everything else is
//! cleartext with prior knowledge.

use bytes::Bytes;
use http::{Request, Response, Uri};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

/// Body type forwarded to upstream channels.
pub type ProxyBody = UnsyncBoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Boxes any compatible body into the channel body type.
pub fn boxed_body<B>(body: B) -> ProxyBody
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// Errors from channel setup and request forwarding.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid upstream target: {0}")]
    InvalidTarget(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream returned grpc-status {code}: {message}")]
    Status { code: u32, message: String },
}

enum ClientKind {
    Plain(Client<HttpConnector, ProxyBody>),
    Tls(Client<HttpsConnector<HttpConnector>, ProxyBody>),
}

/// A live HTTP/2 connection pool to a single upstream authority.
pub struct GrpcChannel {
    client: ClientKind,
    scheme: &'static str,
    authority: String,
    target: String,
}

impl GrpcChannel {
    /// Opens a channel to `target` (`host:port`, optionally scheme-prefixed).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidTarget`] when the target cannot be
    /// parsed into an authority.
    pub fn connect(target: &str) -> Result<Self, ChannelError> {
        let authority = target
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        if authority.is_empty() || authority.contains('/') {
            return Err(ChannelError::InvalidTarget(target.to_string()));
        }

        let use_tls = authority.contains(":443") || target.starts_with("https://");
        let client = if use_tls {
            let connector = HttpsConnectorBuilder::new()
                .with_webpki_roots()
                .https_only()
                .enable_http2()
                .build();
            ClientKind::Tls(Client::builder(TokioExecutor::new()).http2_only(true).build(connector))
        } else {
            ClientKind::Plain(
                Client::builder(TokioExecutor::new()).http2_only(true).build(HttpConnector::new()),
            )
        };

        Ok(Self {
            client,
            scheme: if use_tls { "https" } else { "http" },
            authority,
            target: target.to_string(),
        })
    }

    /// The target string this channel was opened with.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Forwards a request to this channel's authority, rewriting only the
    /// scheme and authority of the URI. Headers, body and trailers pass
    /// through untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidTarget`] for unbuildable URIs and
    /// [`ChannelError::Request`] for connection-level failures.
    pub async fn forward(
        &self,
        mut req: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, ChannelError> {
        let path_and_query =
            req.uri().path_and_query().map_or_else(|| "/".to_string(), ToString::to_string);
        let uri = Uri::builder()
            .scheme(self.scheme)
            .authority(self.authority.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ChannelError::InvalidTarget(e.to_string()))?;
        *req.uri_mut() = uri;
        req.headers_mut().remove(http::header::HOST);

        match &self.client {
            ClientKind::Plain(cli) => {
                cli.request(req).await.map_err(|e| ChannelError::Request(e.to_string()))
            }
            ClientKind::Tls(cli) => {
                cli.request(req).await.map_err(|e| ChannelError::Request(e.to_string()))
            }
        }
    }

    /// Issues a unary gRPC call and returns the raw reply message bytes.
    ///
    /// The request message is wrapped in a standard gRPC frame; the reply
    /// body is collected and the first frame extracted. The gRPC status is
    /// read from trailers (or headers for trailers-only replies).
    ///
    /// # Errors
    ///
    /// [`ChannelError::Status`] for non-OK gRPC statuses, [`ChannelError::Request`]
    /// for transport and framing failures.
    pub async fn unary(&self, path: &str, message: &[u8]) -> Result<Bytes, ChannelError> {
        let req = Request::builder()
            .method(http::Method::POST)
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/grpc")
            .header(http::header::TE, "trailers")
            .body(boxed_body(http_body_util::Full::new(Bytes::from(encode_frame(message)))))
            .map_err(|e| ChannelError::Request(e.to_string()))?;

        let response = self.forward(req).await?;
        let (parts, body) = response.into_parts();

        let collected =
            body.collect().await.map_err(|e| ChannelError::Request(e.to_string()))?;
        let trailers = collected.trailers().cloned();
        let frame = collected.to_bytes();

        let status = read_grpc_status(trailers.as_ref().unwrap_or(&parts.headers));
        if let Some((code, message)) = status {
            if code != 0 {
                return Err(ChannelError::Status { code, message });
            }
        }
        decode_frame(&frame)
    }
}

/// Wraps message bytes in a gRPC length-prefixed frame (no compression).
#[must_use]
pub fn encode_frame(message: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + message.len());
    frame.push(0);
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(message.len() as u32).to_be_bytes());
    frame.extend_from_slice(message);
    frame
}

/// Extracts the first message from a gRPC framed body.
///
/// # Errors
///
/// Returns [`ChannelError::Request`] on short or compressed frames.
pub fn decode_frame(body: &Bytes) -> Result<Bytes, ChannelError> {
    if body.len() < 5 {
        return Err(ChannelError::Request("short grpc frame".to_string()));
    }
    if body[0] != 0 {
        return Err(ChannelError::Request("compressed grpc frame not supported".to_string()));
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if body.len() < 5 + len {
        return Err(ChannelError::Request("truncated grpc frame".to_string()));
    }
    Ok(body.slice(5..5 + len))
}

/// Reads `grpc-status` / `grpc-message` from a header or trailer map.
#[must_use]
pub fn read_grpc_status(headers: &http::HeaderMap) -> Option<(u32, String)> {
    let code = headers.get("grpc-status")?.to_str().ok()?.parse::<u32>().ok()?;
    let message = headers
        .get("grpc-message")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_default();
    Some((code, message))
}
