//! WebSocket client handshake and session.
//!
//! To open a `WebSocket` session, build `WsClient` with a connector that
//! performs http requests, then call `connect()`. Client verifies server's
//! handshake response, negotiates sub-protocol and permessage-deflate
//! compression and returns `WsSession` that drives frames over the upgraded
//! connection.
//!
//! ```rust,ignore
//! let client = WsClient::with_connector("ws://127.0.0.1:8080/ws", connector)
//!     .protocols(["chat"])
//!     .finish()?;
//!
//! let session = client.connect().await?;
//! session.send_str("hello").await?;
//! while let Message::Text(text) = session.receive().await? {
//!     println!("{text}");
//! }
//! session.close(CloseCode::Normal, Bytes::new()).await?;
//! ```
mod attempt;
mod client;
mod extension;
mod proto;
mod session;
mod transport;

pub mod error;

pub use self::attempt::WsAttempt;
pub use self::client::{WsClient, WsClientBuilder};
pub use self::extension::{negotiate, offer, Negotiation};
pub use self::proto::{generate_key, hash_key, CloseCode, CloseReason, KeyGenerator, RandomKey};
pub use self::session::{Message, WsSession};
pub use self::transport::{
    Frame, FrameReader, FrameWriter, HandshakeRequest, HandshakeResponse, Negotiated, Payload,
};
