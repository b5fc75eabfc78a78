//! Websocket client session
use std::cell::{Cell, Ref, RefCell};
use std::{fmt, rc::Rc};

use ntex_bytes::{ByteString, Bytes};
use ntex_util::channel::condition::Condition;
use ntex_util::future::{select, Either};
use ntex_util::time::{timeout, Millis};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{SessionError, StreamError};
use crate::proto::{CloseCode, CloseReason};
use crate::transport::{Frame, FrameReader, FrameWriter, HandshakeResponse, Negotiated, Payload};

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    struct Flags: u8 {
        const CLOSING     = 0b0000_0001;
        const CLOSED      = 0b0000_0010;
        const WAITING     = 0b0000_0100;
        const PEER_CLOSED = 0b0000_1000;
        const RELEASED    = 0b0001_0000;
    }
}

/// Message received from websocket session
#[derive(Debug, Clone)]
pub enum Message {
    /// Text message
    Text(ByteString),
    /// Binary message
    Binary(Bytes),
    /// Ping message
    Ping(Bytes),
    /// Pong message
    Pong(Bytes),
    /// Peer closed connection, or frame stream is terminated
    Close(Option<CloseReason>),
    /// Session is closing, pending `receive()` got interrupted by `close()`
    Closing,
    /// Session is closed
    Closed,
    /// Frame reader failed
    Error(Rc<StreamError>),
    /// No message arrived in time
    Timeout,
}

impl Message {
    fn kind(&self) -> &'static str {
        match self {
            Message::Text(_) => "text",
            Message::Binary(_) => "binary",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Close(_) => "close",
            Message::Closing => "closing",
            Message::Closed => "closed",
            Message::Error(_) => "error",
            Message::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct SessionConfig {
    pub(crate) receive_timeout: Millis,
    pub(crate) close_timeout: Millis,
    pub(crate) autoclose: bool,
    pub(crate) autoping: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            receive_timeout: Millis::ZERO,
            close_timeout: Millis(10_000),
            autoclose: true,
            autoping: true,
        }
    }
}

/// Websocket client session.
///
/// Session is created by successful handshake, it owns upgraded connection
/// and releases it on close.
pub struct WsSession<R: HandshakeResponse> {
    response: RefCell<R>,
    reader: RefCell<R::Reader>,
    writer: R::Writer,
    negotiated: Negotiated,
    cfg: SessionConfig,
    flags: Cell<Flags>,
    close_code: Cell<Option<CloseCode>>,
    exception: RefCell<Option<Rc<StreamError>>>,
    wakeup: Condition,
    released: Condition,
}

impl<R: HandshakeResponse> WsSession<R> {
    pub(crate) fn new(mut response: R, negotiated: Negotiated, cfg: SessionConfig) -> Self {
        let (reader, writer) = response.upgrade(&negotiated);

        WsSession {
            writer,
            negotiated,
            cfg,
            response: RefCell::new(response),
            reader: RefCell::new(reader),
            flags: Cell::new(Flags::empty()),
            close_code: Cell::new(None),
            exception: RefCell::new(None),
            wakeup: Condition::new(),
            released: Condition::new(),
        }
    }

    /// Negotiated sub-protocol
    pub fn protocol(&self) -> Option<&str> {
        self.negotiated.protocol.as_deref()
    }

    /// Compression window bits, `0` if compression is disabled
    pub fn compress(&self) -> u8 {
        self.negotiated.compress
    }

    /// Client must reset compression context after each message
    pub fn client_notakeover(&self) -> bool {
        self.negotiated.client_no_context_takeover
    }

    /// Handshake parameters
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    /// Check if session is closed
    pub fn is_closed(&self) -> bool {
        self.flags.get().contains(Flags::CLOSED)
    }

    /// Close code of the session
    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code.get()
    }

    /// Last error reported by frame reader or writer
    pub fn exception(&self) -> Option<Rc<StreamError>> {
        self.exception.borrow().clone()
    }

    /// Handshake response
    pub fn response(&self) -> Ref<'_, R> {
        self.response.borrow()
    }

    /// Send data message with optional compression override
    pub async fn send(&self, payload: Payload, compress: Option<u8>) -> Result<(), SessionError> {
        self.check_writable()?;
        self.writer.send(payload, compress).await?;
        Ok(())
    }

    /// Send text message
    pub async fn send_str<T: Into<ByteString>>(&self, data: T) -> Result<(), SessionError> {
        self.send(Payload::Text(data.into()), None).await
    }

    /// Send binary message
    pub async fn send_bytes<T: Into<Bytes>>(&self, data: T) -> Result<(), SessionError> {
        self.send(Payload::Binary(data.into()), None).await
    }

    /// Serialize value to json and send it as text message
    pub async fn send_json<T>(&self, data: &T) -> Result<(), SessionError>
    where
        T: Serialize + ?Sized,
    {
        let data = serde_json::to_string(data)?;
        self.send(Payload::Text(data.into()), None).await
    }

    /// Send ping message
    pub async fn ping<T: Into<Bytes>>(&self, data: T) -> Result<(), SessionError> {
        self.check_writable()?;
        self.writer.ping(data.into()).await?;
        Ok(())
    }

    /// Send pong message
    pub async fn pong<T: Into<Bytes>>(&self, data: T) -> Result<(), SessionError> {
        self.check_writable()?;
        self.writer.pong(data.into()).await?;
        Ok(())
    }

    /// Receive next message, uses configured receive timeout
    pub async fn receive(&self) -> Result<Message, SessionError> {
        self.receive_timeout(self.cfg.receive_timeout).await
    }

    /// Receive next message.
    ///
    /// Only one receive call could be pending at a time, including the time
    /// spent answering pings. Reader errors, timeouts and stream termination
    /// are reported as messages.
    pub async fn receive_timeout(&self, to: Millis) -> Result<Message, SessionError> {
        if self.flags.get().contains(Flags::WAITING) {
            return Err(SessionError::ConcurrentReceive);
        }
        if self.is_closed() {
            return Ok(Message::Closed);
        } else if self.flags.get().contains(Flags::CLOSING) {
            self.close(CloseCode::Normal, Bytes::new()).await?;
            return Ok(Message::Closed);
        }

        let (msg, close) = {
            let _guard = Waiting::new(self);
            self.next_message(to).await?
        };

        // pending receive is released, close() can take over the reader
        if close {
            self.close(CloseCode::Normal, Bytes::new()).await?;
        }
        Ok(msg)
    }

    /// Read frames until a message is available, flag marks that the session
    /// has to be closed before the message is returned
    async fn next_message(&self, to: Millis) -> Result<(Message, bool), SessionError> {
        loop {
            // close() was called while autoping was in progress
            if self.flags.get().contains(Flags::CLOSING) {
                return Ok((Message::Closing, false));
            }

            let wakeup = self.wakeup.wait();
            let item = if to.non_zero() {
                match select(timeout(to, self.read_frame()), wakeup.ready()).await {
                    Either::Left(Ok(item)) => item,
                    Either::Left(Err(_)) => {
                        log::trace!("Receive timeout {to:?} elapsed");
                        return Ok((Message::Timeout, false));
                    }
                    Either::Right(_) => return Ok((Message::Closing, false)),
                }
            } else {
                match select(self.read_frame(), wakeup.ready()).await {
                    Either::Left(item) => item,
                    Either::Right(_) => return Ok((Message::Closing, false)),
                }
            };

            let frame = match item {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::trace!("Frame stream is terminated, closing session");
                    self.insert_flags(Flags::CLOSING | Flags::PEER_CLOSED);
                    return Ok((Message::Close(None), true));
                }
                Err(err) => return self.failed(err).map(|msg| (msg, false)),
            };

            match frame {
                Frame::Text(text) => return Ok((Message::Text(text), false)),
                Frame::Binary(bin) => return Ok((Message::Binary(bin), false)),
                Frame::Ping(data) => {
                    if self.cfg.autoping {
                        if !self.writer.is_closing() {
                            if let Err(err) = self.writer.pong(data).await {
                                return self.failed(err).map(|msg| (msg, false));
                            }
                        }
                        continue;
                    }
                    return Ok((Message::Ping(data), false));
                }
                Frame::Pong(data) => {
                    if self.cfg.autoping {
                        continue;
                    }
                    return Ok((Message::Pong(data), false));
                }
                Frame::Close(reason) => {
                    log::trace!("Received close frame: {reason:?}");
                    self.insert_flags(Flags::CLOSING | Flags::PEER_CLOSED);
                    self.close_code
                        .set(Some(reason.as_ref().map_or(CloseCode::Normal, |r| r.code)));
                    return Ok((Message::Close(reason), self.cfg.autoclose));
                }
            }
        }
    }

    /// Receive text message
    pub async fn receive_str(&self) -> Result<ByteString, SessionError> {
        match self.receive().await? {
            Message::Text(text) => Ok(text),
            msg => Err(SessionError::UnexpectedMessage("text", msg.kind())),
        }
    }

    /// Receive binary message
    pub async fn receive_bytes(&self) -> Result<Bytes, SessionError> {
        match self.receive().await? {
            Message::Binary(bin) => Ok(bin),
            msg => Err(SessionError::UnexpectedMessage("binary", msg.kind())),
        }
    }

    /// Receive text message and deserialize it from json
    pub async fn receive_json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        let text = self.receive_str().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Close session.
    ///
    /// Returns `true` if this call closed the session. Writer errors are
    /// stored and available via `exception()`, only cancellation is returned.
    pub async fn close(&self, code: CloseCode, message: Bytes) -> Result<bool, SessionError> {
        // interrupt pending receive
        if self.flags.get().contains(Flags::WAITING) {
            self.insert_flags(Flags::CLOSING);
            self.wakeup.notify();
            while self.flags.get().contains(Flags::WAITING) {
                self.released.wait().ready().await;
            }
        }

        if self.is_closed() {
            return Ok(false);
        }
        self.insert_flags(Flags::CLOSING | Flags::CLOSED);
        log::trace!("Closing websocket session, code: {code}");

        match self.writer.close(code, message).await {
            Ok(()) => (),
            Err(StreamError::Canceled) => {
                self.close_code.set(Some(CloseCode::Abnormal));
                self.release();
                return Err(SessionError::Canceled);
            }
            Err(err) => {
                log::trace!("Cannot send close frame: {err}");
                self.close_code.set(Some(CloseCode::Abnormal));
                self.set_exception(err);
                self.release();
                return Ok(true);
            }
        }

        if !self.flags.get().contains(Flags::PEER_CLOSED) {
            let result = self.wait_peer_close().await;
            self.release();
            result?;
        } else {
            self.release();
        }
        Ok(true)
    }

    async fn wait_peer_close(&self) -> Result<(), SessionError> {
        let to = self.cfg.close_timeout;
        loop {
            let item = if to.non_zero() {
                match timeout(to, self.read_frame()).await {
                    Ok(item) => item,
                    Err(_) => {
                        log::trace!("Peer did not respond with close frame in {to:?}");
                        self.close_code.set(Some(CloseCode::Abnormal));
                        return Ok(());
                    }
                }
            } else {
                self.read_frame().await
            };

            match item {
                Ok(Some(Frame::Close(reason))) => {
                    self.insert_flags(Flags::PEER_CLOSED);
                    self.close_code
                        .set(Some(reason.as_ref().map_or(CloseCode::Normal, |r| r.code)));
                    return Ok(());
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Ok(()),
                Err(StreamError::Canceled) => {
                    self.close_code.set(Some(CloseCode::Abnormal));
                    return Err(SessionError::Canceled);
                }
                Err(err) => {
                    self.close_code.set(Some(CloseCode::Abnormal));
                    self.set_exception(err);
                    return Ok(());
                }
            }
        }
    }

    #[allow(clippy::await_holding_refcell_ref)]
    async fn read_frame(&self) -> Result<Option<Frame>, StreamError> {
        // WAITING flag or CLOSED state guarantees single reader
        self.reader.borrow_mut().next().await
    }

    fn failed(&self, err: StreamError) -> Result<Message, SessionError> {
        if let StreamError::Canceled = err {
            return Err(SessionError::Canceled);
        }
        log::trace!("Frame stream failed: {err}");
        Ok(Message::Error(self.set_exception(err)))
    }

    fn set_exception(&self, err: StreamError) -> Rc<StreamError> {
        let err = Rc::new(err);
        *self.exception.borrow_mut() = Some(err.clone());
        err
    }

    fn check_writable(&self) -> Result<(), SessionError> {
        if self.writer.is_closing() {
            Err(SessionError::ConnectionReset)
        } else {
            Ok(())
        }
    }

    fn release(&self) {
        if !self.flags.get().contains(Flags::RELEASED) {
            log::trace!("Release websocket connection");
            self.insert_flags(Flags::RELEASED);
            self.response.borrow_mut().close();
        }
    }

    fn insert_flags(&self, f: Flags) {
        let mut flags = self.flags.get();
        flags.insert(f);
        self.flags.set(flags);
    }

    fn remove_flags(&self, f: Flags) {
        let mut flags = self.flags.get();
        flags.remove(f);
        self.flags.set(flags);
    }
}

impl<R: HandshakeResponse> Drop for WsSession<R> {
    fn drop(&mut self) {
        // close() could be dropped before connection is released
        self.release();
    }
}

impl<R: HandshakeResponse> fmt::Debug for WsSession<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSession")
            .field("protocol", &self.negotiated.protocol)
            .field("compress", &self.negotiated.compress)
            .field("flags", &self.flags.get())
            .finish()
    }
}

/// Marks pending receive, wakes `close()` on completion or drop
struct Waiting<'a, R: HandshakeResponse>(&'a WsSession<R>);

impl<'a, R: HandshakeResponse> Waiting<'a, R> {
    fn new(session: &'a WsSession<R>) -> Self {
        session.insert_flags(Flags::WAITING);
        Waiting(session)
    }
}

impl<R: HandshakeResponse> Drop for Waiting<'_, R> {
    fn drop(&mut self) {
        self.0.remove_flags(Flags::WAITING);
        self.0.released.notify();
    }
}
