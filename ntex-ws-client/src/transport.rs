//! Interfaces of http transport and frame codec used by websocket client.
use ntex_bytes::{ByteString, Bytes};
use ntex_http::{HeaderMap, Method, StatusCode, Uri};
use ntex_util::time::Millis;

use crate::error::StreamError;
use crate::proto::{CloseCode, CloseReason};

/// Http upgrade request, produced for every handshake attempt
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// Request method
    pub method: Method,
    /// Target url
    pub uri: Uri,
    /// Request headers, including freshly generated `Sec-WebSocket-Key`
    pub headers: HeaderMap,
    /// Query parameters
    pub params: Vec<(String, String)>,
    /// Time to wait for response, zero means no limit
    pub timeout: Millis,
    /// Transport must not follow redirects
    pub follow_redirects: bool,
    /// Transport must not decode response body
    pub decompress: bool,
}

/// Parameters agreed during handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// Selected sub-protocol
    pub protocol: Option<String>,
    /// Compression window bits, `0` if compression is disabled
    pub compress: u8,
    /// Client must reset compression context after each message
    pub client_no_context_takeover: bool,
}

/// Http response to websocket handshake request
pub trait HandshakeResponse {
    /// Decoded frames stream
    type Reader: FrameReader;
    /// Frames sink
    type Writer: FrameWriter;

    /// Response status code
    fn status(&self) -> StatusCode;

    /// Response headers
    fn headers(&self) -> &HeaderMap;

    /// Release connection without consuming the body
    fn close(&mut self);

    /// Switch connection to websocket framing
    fn upgrade(&mut self, params: &Negotiated) -> (Self::Reader, Self::Writer);
}

/// Decoded websocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text frame
    Text(ByteString),
    /// Binary frame
    Binary(Bytes),
    /// Ping message
    Ping(Bytes),
    /// Pong message
    Pong(Bytes),
    /// Close message with optional reason
    Close(Option<CloseReason>),
}

/// Data message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text payload
    Text(ByteString),
    /// Binary payload
    Binary(Bytes),
}

/// Websocket frames reader
#[allow(async_fn_in_trait)]
pub trait FrameReader {
    /// Read next frame, `None` means end of stream
    async fn next(&mut self) -> Result<Option<Frame>, StreamError>;
}

/// Websocket frames writer
#[allow(async_fn_in_trait)]
pub trait FrameWriter {
    /// Check if close frame has been sent or connection is closing
    fn is_closing(&self) -> bool;

    /// Send data message.
    ///
    /// `compress` overrides negotiated compression for this message.
    async fn send(&self, payload: Payload, compress: Option<u8>) -> Result<(), StreamError>;

    /// Send ping message
    async fn ping(&self, data: Bytes) -> Result<(), StreamError>;

    /// Send pong message
    async fn pong(&self, data: Bytes) -> Result<(), StreamError>;

    /// Send close message
    async fn close(&self, code: CloseCode, message: Bytes) -> Result<(), StreamError>;
}
