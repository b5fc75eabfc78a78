use std::{fmt, rc::Rc};

use base64::{engine::general_purpose::STANDARD as base64, Engine};
use nanorand::{Rng, WyRand};
use sha1::{Digest, Sha1};

/// Magic string used for `Sec-WebSocket-Accept` calculation (RFC 6455)
static WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Status code used to indicate why an endpoint is closing the `WebSocket`
/// connection.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// Indicates a normal closure, meaning that the purpose for
    /// which the connection was established has been fulfilled.
    Normal,
    /// Indicates that an endpoint is "going away", such as a server
    /// going down or a browser having navigated away from a page.
    Away,
    /// Indicates that an endpoint is terminating the connection due
    /// to a protocol error.
    Protocol,
    /// Indicates that an endpoint is terminating the connection
    /// because it has received a type of data it cannot accept.
    Unsupported,
    /// Reserved. Indicates that the connection was closed abnormally,
    /// without sending or receiving a close frame.
    Abnormal,
    /// Indicates that an endpoint is terminating the connection
    /// because it has received data within a message that was not
    /// consistent with the type of the message.
    Invalid,
    /// Indicates that an endpoint is terminating the connection
    /// because it has received a message that violates its policy.
    Policy,
    /// Indicates that an endpoint is terminating the connection
    /// because it has received a message that is too big for it to
    /// process.
    Size,
    /// Indicates that the client is terminating the connection because
    /// the server did not negotiate an extension the client expected.
    Extension,
    /// Indicates that a server is terminating the connection because
    /// it encountered an unexpected condition.
    Error,
    /// Indicates that the server is restarting.
    Restart,
    /// Indicates that the server is overloaded and the client should
    /// retry later.
    Again,
    #[doc(hidden)]
    Other(u16),
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            _ => CloseCode::Other(code),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
/// Reason for closing the connection
pub struct CloseReason {
    /// Exit code
    pub code: CloseCode,
    /// Optional description of the exit code
    pub description: Option<String>,
}

impl From<CloseCode> for CloseReason {
    fn from(code: CloseCode) -> Self {
        CloseReason {
            code,
            description: None,
        }
    }
}

impl<T: Into<String>> From<(CloseCode, T)> for CloseReason {
    fn from(info: (CloseCode, T)) -> Self {
        CloseReason {
            code: info.0,
            description: Some(info.1.into()),
        }
    }
}

/// Hash `Sec-WebSocket-Key` value and return the expected
/// `Sec-WebSocket-Accept` value.
pub fn hash_key(key: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(WS_GUID.as_bytes());
    base64.encode(hasher.finalize())
}

/// Source of `Sec-WebSocket-Key` nonces.
///
/// Every handshake attempt asks the generator for a fresh key. Any
/// `Fn() -> [u8; 16]` closure is a generator, which allows deterministic keys
/// in tests.
pub trait KeyGenerator {
    /// Generate 16 random bytes
    fn generate(&self) -> [u8; 16];
}

impl<F> KeyGenerator for F
where
    F: Fn() -> [u8; 16],
{
    fn generate(&self) -> [u8; 16] {
        (self)()
    }
}

/// Default key generator, backed by `WyRand`
#[derive(Debug, Default, Copy, Clone)]
pub struct RandomKey;

impl KeyGenerator for RandomKey {
    fn generate(&self) -> [u8; 16] {
        let mut sec_key: [u8; 16] = [0; 16];
        WyRand::new().fill(&mut sec_key);
        sec_key
    }
}

/// Generate new client key, returns raw bytes and base64-encoded value.
pub fn generate_key(generator: &dyn KeyGenerator) -> ([u8; 16], String) {
    // a base64-encoded (see Section 4 of [RFC4648]) value that,
    // when decoded, is 16 bytes in length (RFC 6455)
    let raw = generator.generate();
    let key = base64.encode(raw);
    (raw, key)
}

pub(crate) type SharedKeyGenerator = Rc<dyn KeyGenerator>;
