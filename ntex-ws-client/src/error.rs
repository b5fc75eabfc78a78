//! WebSocket client related errors.
use std::{error, io};

use ntex_http::{error::Error as HttpError, HeaderMap, HeaderValue, StatusCode};

/// Websocket protocol errors reported by frame reader or writer
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Received a masked frame from server
    #[error("Received a masked frame from server")]
    MaskedFrame,
    /// Encountered invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),
    /// Invalid control frame length
    #[error("Invalid control frame length: {0}")]
    InvalidLength(usize),
    /// Bad web socket op code
    #[error("Bad web socket op code")]
    BadOpCode,
    /// A payload reached size limit.
    #[error("A payload reached size limit.")]
    Overflow,
    /// Text frame payload is not valid utf-8
    #[error("Invalid utf-8 payload")]
    InvalidUtf8,
    /// Continuation is not started
    #[error("Continuation is not started.")]
    ContinuationNotStarted,
    /// Received new continuation but it is already started
    #[error("Received new continuation but it is already started")]
    ContinuationStarted,
}

/// Frame stream errors
#[derive(thiserror::Error, Debug)]
pub enum StreamError {
    /// Ws protocol level error
    #[error("{0}")]
    Protocol(#[from] ProtocolError),
    /// Peer has been disconnected
    #[error("Peer has been disconnected: {0:?}")]
    Disconnected(Option<io::Error>),
    /// Operation has been canceled
    #[error("Operation has been canceled")]
    Canceled,
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Disconnected(Some(err))
    }
}

/// Permessage-deflate negotiation errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// `client_max_window_bits` is not an integer in `9..=15`
    #[error("Invalid window size: {0}")]
    InvalidWindowSize(String),
    /// Server offered a parameter the client cannot honor
    #[error("Extension for deflate not supported: {0}")]
    UnsupportedParameter(String),
    /// Extension header cannot be parsed
    #[error("Malformed extension header: {0}")]
    Malformed(String),
}

/// Classified handshake failure
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Invalid response status
    #[error("Invalid response status")]
    InvalidResponseStatus(StatusCode),
    /// Invalid upgrade header
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,
    /// Invalid or missing connection header
    #[error("Invalid connection header")]
    InvalidConnectionHeader(Option<HeaderValue>),
    /// Invalid or missing challenge response
    #[error("Invalid challenge response")]
    InvalidChallengeResponse(String, Option<HeaderValue>),
    /// Server's permessage-deflate response cannot be honored
    #[error("Invalid compression notification")]
    InvalidCompressionNotification(#[source] ExtensionError),
}

/// Status and headers of a handshake response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Websocket client builder error
#[derive(thiserror::Error, Debug)]
pub enum WsClientBuilderError {
    #[error("Missing url scheme")]
    MissingScheme,
    #[error("Unknown url scheme")]
    UnknownScheme,
    #[error("Missing host name")]
    MissingHost,
    #[error("Compress wbits must be between 9 and 15: {0}")]
    InvalidCompress(u8),
    #[error("Url parse error: {0}")]
    Http(#[from] HttpError),
}

/// Websocket client error
#[derive(thiserror::Error, Debug)]
pub enum WsClientError {
    /// Server handshake response has been rejected
    #[error("{0}")]
    Handshake(HandshakeError, ResponseHead),
    /// Response took too long
    #[error("Timeout out while waiting for response")]
    Timeout,
    /// Http transport failed to perform request
    #[error("Failed to send handshake request: {0}")]
    Transport(Box<dyn error::Error>),
    /// Handshake request cannot be constructed
    #[error("Invalid handshake request: {0}")]
    InvalidRequest(#[from] HttpError),
}

impl WsClientError {
    /// Classified handshake failure, if any
    pub fn handshake(&self) -> Option<&HandshakeError> {
        match self {
            WsClientError::Handshake(err, _) => Some(err),
            _ => None,
        }
    }

    /// Head of the rejected response, if any
    pub fn response(&self) -> Option<&ResponseHead> {
        match self {
            WsClientError::Handshake(_, head) => Some(head),
            _ => None,
        }
    }
}

/// Websocket session errors
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// Another `receive()` call is pending on the same session
    #[error("Concurrent call to receive() is not allowed")]
    ConcurrentReceive,
    /// Writer is closing, payload cannot be sent
    #[error("Cannot write to closing transport")]
    ConnectionReset,
    /// Json payload cannot be serialized or deserialized
    #[error("Json payload error: {0}")]
    Json(#[from] serde_json::Error),
    /// Received message of unexpected kind
    #[error("Expected {0} message, received {1}")]
    UnexpectedMessage(&'static str, &'static str),
    /// Frame writer failed
    #[error("{0}")]
    Stream(StreamError),
    /// Operation has been canceled
    #[error("Operation has been canceled")]
    Canceled,
}

impl From<StreamError> for SessionError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Canceled => SessionError::Canceled,
            err => SessionError::Stream(err),
        }
    }
}
