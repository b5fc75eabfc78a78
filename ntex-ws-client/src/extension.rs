//! Permessage-deflate extension negotiation (RFC 7692)
use crate::error::ExtensionError;

/// Default and maximum LZ77 window size
pub const DEFAULT_WINDOW_BITS: u8 = 15;

/// Minimum LZ77 window size supported by zlib
pub const MIN_WINDOW_BITS: u8 = 9;

const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";

/// Result of permessage-deflate negotiation
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Server accepted compression
    pub enabled: bool,
    /// Client window bits, `9..=15`
    pub window_bits: u8,
    /// Client must reset compression context after each message
    pub client_no_context_takeover: bool,
}

impl Negotiation {
    /// Compression is not negotiated
    pub const fn disabled() -> Self {
        Negotiation {
            enabled: false,
            window_bits: DEFAULT_WINDOW_BITS,
            client_no_context_takeover: false,
        }
    }

    /// Effective window bits, `0` if compression is disabled
    pub fn compress(&self) -> u8 {
        if self.enabled {
            self.window_bits
        } else {
            0
        }
    }
}

/// Check if window bits value is supported
pub fn is_valid_window_bits(bits: u8) -> bool {
    (MIN_WINDOW_BITS..=DEFAULT_WINDOW_BITS).contains(&bits)
}

/// Generate `Sec-WebSocket-Extensions` request value.
///
/// `bits` must be in `9..=15` range. Only client side parameters are
/// offered, server is never asked to limit its own window.
pub fn offer(bits: u8, client_no_context_takeover: bool) -> String {
    let mut ext = format!("{PERMESSAGE_DEFLATE}; {CLIENT_MAX_WINDOW_BITS}");
    if bits < DEFAULT_WINDOW_BITS {
        ext.push_str(&format!("={bits}"));
    }
    if client_no_context_takeover {
        ext.push_str("; ");
        ext.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
    }
    ext
}

/// Negotiate compression parameters from server's `Sec-WebSocket-Extensions`
/// response value.
///
/// `requested` is window bits requested by client, `0` means compression
/// is disabled and any server offer is ignored. Extensions other than
/// permessage-deflate are ignored, unknown permessage-deflate parameters
/// fail negotiation.
pub fn negotiate(header: Option<&str>, requested: u8) -> Result<Negotiation, ExtensionError> {
    if requested == 0 {
        return Ok(Negotiation::disabled());
    }
    let header = match header {
        Some(header) => header,
        None => return Ok(Negotiation::disabled()),
    };

    for ext in header.split(',') {
        let mut params = ext.split(';');
        let token = params.next().unwrap_or_default().trim();
        if !token.eq_ignore_ascii_case(PERMESSAGE_DEFLATE) {
            log::trace!("Ignore unsupported extension: {token:?}");
            continue;
        }

        let mut window_bits: Option<u8> = None;
        let mut window_bits_seen = false;
        let mut no_context_takeover = false;

        for param in params {
            let param = param.trim();
            let (name, value) = match param.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (param, None),
            };

            if name.is_empty() {
                return Err(ExtensionError::Malformed(ext.trim().to_string()));
            } else if name.eq_ignore_ascii_case(CLIENT_MAX_WINDOW_BITS) {
                if window_bits_seen {
                    return Err(ExtensionError::Malformed(ext.trim().to_string()));
                }
                window_bits_seen = true;
                if let Some(value) = value {
                    window_bits = Some(parse_window_bits(value)?);
                }
            } else if name.eq_ignore_ascii_case(CLIENT_NO_CONTEXT_TAKEOVER) && value.is_none() {
                if no_context_takeover {
                    return Err(ExtensionError::Malformed(ext.trim().to_string()));
                }
                no_context_takeover = true;
            } else {
                return Err(ExtensionError::UnsupportedParameter(param.to_string()));
            }
        }

        let fallback = if is_valid_window_bits(requested) {
            requested
        } else {
            DEFAULT_WINDOW_BITS
        };
        return Ok(Negotiation {
            enabled: true,
            window_bits: window_bits.unwrap_or(fallback),
            client_no_context_takeover: no_context_takeover,
        });
    }

    Ok(Negotiation::disabled())
}

fn parse_window_bits(value: &str) -> Result<u8, ExtensionError> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(bits) = value.parse::<u8>() {
            if is_valid_window_bits(bits) {
                return Ok(bits);
            }
        }
    }
    Err(ExtensionError::InvalidWindowSize(value.to_string()))
}
