//! Result of a single handshake
use std::fmt;

use crate::error::{ResponseHead, WsClientError};
use crate::session::{SessionConfig, WsSession};
use crate::transport::{HandshakeResponse, Negotiated};

enum State<R> {
    Success(R, Negotiated),
    Failed(WsClientError, Option<R>),
}

/// Handshake attempt.
///
/// Successful attempt could be upgraded to session, failed attempt keeps
/// the error and the rejected response, which is already released.
/// Dropping successful attempt without upgrade releases the connection.
pub struct WsAttempt<R: HandshakeResponse> {
    state: Option<State<R>>,
    cfg: SessionConfig,
}

impl<R: HandshakeResponse> WsAttempt<R> {
    pub(crate) fn success(response: R, negotiated: Negotiated, cfg: SessionConfig) -> Self {
        WsAttempt {
            cfg,
            state: Some(State::Success(response, negotiated)),
        }
    }

    pub(crate) fn failed(err: WsClientError, response: Option<R>, cfg: SessionConfig) -> Self {
        WsAttempt {
            cfg,
            state: Some(State::Failed(err, response)),
        }
    }

    /// Check if handshake succeeded
    pub fn succeeded(&self) -> bool {
        matches!(self.state, Some(State::Success(..)))
    }

    /// Handshake error
    pub fn error(&self) -> Option<&WsClientError> {
        match self.state {
            Some(State::Failed(ref err, _)) => Some(err),
            _ => None,
        }
    }

    /// Rejected response, `None` if handshake succeeded or transport failed
    pub fn error_response(&self) -> Option<&R> {
        match self.state {
            Some(State::Failed(_, ref res)) => res.as_ref(),
            _ => None,
        }
    }

    /// Status and headers of the rejected response
    pub fn error_head(&self) -> Option<&ResponseHead> {
        self.error().and_then(|err| err.response())
    }

    /// Negotiated parameters of successful handshake
    pub fn negotiated(&self) -> Option<&Negotiated> {
        match self.state {
            Some(State::Success(_, ref negotiated)) => Some(negotiated),
            _ => None,
        }
    }

    /// Convert successful attempt into session, or return handshake error
    pub fn upgrade(mut self) -> Result<WsSession<R>, WsClientError> {
        match self.state.take() {
            Some(State::Success(response, negotiated)) => {
                Ok(WsSession::new(response, negotiated, self.cfg))
            }
            Some(State::Failed(err, _)) => Err(err),
            None => unreachable!(),
        }
    }
}

impl<R: HandshakeResponse> Drop for WsAttempt<R> {
    fn drop(&mut self) {
        if let Some(State::Success(ref mut response, _)) = self.state {
            log::trace!("Release unused ws connection");
            response.close();
        }
    }
}

impl<R: HandshakeResponse> fmt::Debug for WsAttempt<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsAttempt")
            .field("succeeded", &self.succeeded())
            .field("error", &self.error())
            .finish()
    }
}
