//! Websockets client
use std::{cell::RefCell, fmt, rc::Rc};

use base64::{engine::general_purpose::STANDARD as base64, Engine};
use ntex_http::error::Error as HttpError;
use ntex_http::header::{self, HeaderName, HeaderValue, AUTHORIZATION};
use ntex_http::{HeaderMap, Method, StatusCode, Uri};
use ntex_service::{Pipeline, Service};
use ntex_util::time::{timeout, Millis};

use crate::attempt::WsAttempt;
use crate::error::{HandshakeError, ResponseHead, WsClientBuilderError, WsClientError};
use crate::extension::{self, DEFAULT_WINDOW_BITS};
use crate::proto::{generate_key, hash_key, KeyGenerator, RandomKey, SharedKeyGenerator};
use crate::session::{SessionConfig, WsSession};
use crate::transport::{HandshakeRequest, HandshakeResponse, Negotiated};

/// `WebSocket` client
pub struct WsClient<T> {
    connector: Pipeline<T>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: Vec<(String, String)>,
    protocols: Vec<String>,
    timeout: Millis,
    compress: u8,
    session: SessionConfig,
    key_generator: SharedKeyGenerator,
    extra_headers: RefCell<Option<HeaderMap>>,
}

/// `WebSocket` client builder
pub struct WsClientBuilder<T> {
    inner: Option<Inner<T>>,
    err: Option<HttpError>,
    protocols: Vec<String>,
    origin: Option<HeaderValue>,
}

struct Inner<T> {
    connector: T,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: Vec<(String, String)>,
    timeout: Millis,
    compress: u8,
    client_notakeover: bool,
    session: SessionConfig,
    key_generator: SharedKeyGenerator,
}

impl WsClient<()> {
    /// Create new websocket client builder
    pub fn build<U>(uri: U) -> WsClientBuilder<()>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<HttpError>,
    {
        WsClientBuilder::new(uri)
    }

    /// Create new websocket client builder
    pub fn with_connector<T, U>(uri: U, connector: T) -> WsClientBuilder<T>
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<HttpError>,
        T: Service<HandshakeRequest>,
        T::Response: HandshakeResponse,
    {
        WsClientBuilder::new(uri).connector(connector)
    }
}

impl<T> WsClient<T> {
    /// Insert a header, replaces existing header.
    ///
    /// Extra headers are sent with every subsequent handshake. Handshake
    /// headers (`Upgrade`, `Connection`, `Sec-WebSocket-*`) are not overridden.
    pub fn set_header<K, V>(&self, key: K, value: V) -> Result<(), HttpError>
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
        <HeaderName as TryFrom<K>>::Error: Into<HttpError>,
        <HeaderValue as TryFrom<V>>::Error: Into<HttpError>,
    {
        let key = HeaderName::try_from(key).map_err(Into::into)?;
        let value = HeaderValue::try_from(value).map_err(Into::into)?;
        self.extra_headers
            .borrow_mut()
            .get_or_insert_with(HeaderMap::new)
            .insert(key, value);
        Ok(())
    }

    /// Set HTTP basic authorization header
    pub fn set_basic_auth<U>(&self, username: U, password: Option<&str>) -> Result<(), HttpError>
    where
        U: fmt::Display,
    {
        self.set_header(AUTHORIZATION, basic_auth(username, password))
    }

    /// Set HTTP bearer authentication header
    pub fn set_bearer_auth<U>(&self, token: U) -> Result<(), HttpError>
    where
        U: fmt::Display,
    {
        self.set_header(AUTHORIZATION, format!("Bearer {token}"))
    }

    /// Request url
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Build handshake request with fresh key.
    ///
    /// Client headers are copied, so every attempt carries its own key.
    fn request(&self) -> Result<(HandshakeRequest, String), WsClientError> {
        let mut headers = self.headers.clone();
        if let Some(extra) = &*self.extra_headers.borrow() {
            for (key, value) in extra.iter() {
                if is_handshake_header(key) {
                    log::warn!("Ignore extra header {key:?}, it is set by ws handshake");
                } else {
                    headers.insert(key.clone(), value.clone());
                }
            }
        }

        let (_, key) = generate_key(&*self.key_generator);
        headers.insert(
            header::SEC_WEBSOCKET_KEY,
            HeaderValue::try_from(key.as_str()).map_err(HttpError::from)?,
        );

        let req = HandshakeRequest {
            headers,
            method: self.method.clone(),
            uri: self.uri.clone(),
            params: self.params.clone(),
            timeout: self.timeout,
            follow_redirects: false,
            decompress: false,
        };
        Ok((req, key))
    }
}

impl<T> WsClient<T>
where
    T: Service<HandshakeRequest>,
    T::Response: HandshakeResponse,
    T::Error: std::error::Error + 'static,
{
    /// Complete request construction and connect to a websockets server.
    pub async fn connect(&self) -> Result<WsSession<T::Response>, WsClientError> {
        self.try_connect().await.upgrade()
    }

    /// Connect to a websockets server and wrap session into custom type.
    pub async fn connect_as<S>(&self) -> Result<S, WsClientError>
    where
        S: From<WsSession<T::Response>>,
    {
        self.connect().await.map(S::from)
    }

    /// Perform handshake, failures are stored in returned attempt.
    pub async fn try_connect(&self) -> WsAttempt<T::Response> {
        let (req, key) = match self.request() {
            Ok(req) => req,
            Err(err) => return WsAttempt::failed(err, None, self.session),
        };
        let to = self.timeout;
        log::trace!("Open ws connection to {:?}", req.uri);

        let fut = self.connector.call(req);
        let result = if to.non_zero() {
            timeout(to, fut)
                .await
                .map_err(|_| WsClientError::Timeout)
                .and_then(|res| res.map_err(|e| WsClientError::Transport(Box::new(e))))
        } else {
            fut.await.map_err(|e| WsClientError::Transport(Box::new(e)))
        };

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                log::trace!("Ws handshake request failed: {err}");
                return WsAttempt::failed(err, None, self.session);
            }
        };
        log::trace!("Ws handshake response is received: {}", response.status());

        match validate(&response, &key, &self.protocols, self.compress) {
            Ok(negotiated) => {
                log::trace!("Ws handshake response verification is completed: {negotiated:?}");
                WsAttempt::success(response, negotiated, self.session)
            }
            Err(err) => {
                let head = ResponseHead {
                    status: response.status(),
                    headers: response.headers().clone(),
                };
                response.close();
                let err = WsClientError::Handshake(err, head);
                WsAttempt::failed(err, Some(response), self.session)
            }
        }
    }
}

/// Verify server's handshake response
fn validate<R: HandshakeResponse>(
    response: &R,
    key: &str,
    protocols: &[String],
    compress: u8,
) -> Result<Negotiated, HandshakeError> {
    let status = response.status();
    if status != StatusCode::SWITCHING_PROTOCOLS {
        log::trace!("Invalid response status: {status}");
        return Err(HandshakeError::InvalidResponseStatus(status));
    }
    let headers = response.headers();

    // Check for "UPGRADE" to websocket header
    let has_hdr = headers
        .get(&header::UPGRADE)
        .and_then(|hdr| hdr.to_str().ok())
        .map(|s| s.trim().eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !has_hdr {
        log::trace!("Invalid upgrade header");
        return Err(HandshakeError::InvalidUpgradeHeader);
    }

    // Check for "CONNECTION" header
    if let Some(conn) = headers.get(&header::CONNECTION) {
        let has_upgrade = conn
            .to_str()
            .map(|s| s.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
            .unwrap_or(false);
        if !has_upgrade {
            log::trace!("Invalid connection header: {conn:?}");
            return Err(HandshakeError::InvalidConnectionHeader(Some(conn.clone())));
        }
    } else {
        log::trace!("Missing connection header");
        return Err(HandshakeError::InvalidConnectionHeader(None));
    }

    let encoded = hash_key(key.as_bytes());
    match headers.get(&header::SEC_WEBSOCKET_ACCEPT) {
        Some(hdr_key) if hdr_key.as_bytes() == encoded.as_bytes() => (),
        hdr_key => {
            log::trace!(
                "Invalid challenge response: expected: {encoded} received: {hdr_key:?}"
            );
            return Err(HandshakeError::InvalidChallengeResponse(
                encoded,
                hdr_key.cloned(),
            ));
        }
    }

    let negotiation = if compress != 0 {
        let ext = headers
            .get(&header::SEC_WEBSOCKET_EXTENSIONS)
            .and_then(|hdr| hdr.to_str().ok());
        extension::negotiate(ext, compress).map_err(|e| {
            log::trace!("Invalid compression notification: {e}");
            HandshakeError::InvalidCompressionNotification(e)
        })?
    } else {
        extension::Negotiation::disabled()
    };

    // server's order decides
    let protocol = headers
        .get(&header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|hdr| hdr.to_str().ok())
        .and_then(|hdr| {
            hdr.split(',')
                .map(str::trim)
                .find(|proto| protocols.iter().any(|p| p.as_str() == *proto))
        })
        .map(ToString::to_string);

    Ok(Negotiated {
        protocol,
        compress: negotiation.compress(),
        client_no_context_takeover: negotiation.client_no_context_takeover,
    })
}

/// Headers owned by the handshake, extra client headers cannot override them
fn is_handshake_header(name: &HeaderName) -> bool {
    *name == header::UPGRADE
        || *name == header::CONNECTION
        || *name == header::SEC_WEBSOCKET_KEY
        || *name == header::SEC_WEBSOCKET_VERSION
        || *name == header::SEC_WEBSOCKET_PROTOCOL
        || *name == header::SEC_WEBSOCKET_EXTENSIONS
}

fn basic_auth<U: fmt::Display>(username: U, password: Option<&str>) -> String {
    let auth = match password {
        Some(password) => format!("{username}:{password}"),
        None => format!("{username}:"),
    };
    format!("Basic {}", base64.encode(auth))
}

impl<T> fmt::Debug for WsClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nWsClient {}:{}", self.method, self.uri)?;
        writeln!(f, "  headers:")?;
        for (key, val) in self.headers.iter() {
            writeln!(f, "    {key:?}: {val:?}")?;
        }
        Ok(())
    }
}

impl WsClientBuilder<()> {
    /// Create new websocket client builder
    fn new<U>(uri: U) -> Self
    where
        Uri: TryFrom<U>,
        <Uri as TryFrom<U>>::Error: Into<HttpError>,
    {
        let (uri, err) = match Uri::try_from(uri) {
            Ok(uri) => (uri, None),
            Err(e) => (Uri::default(), Some(e.into())),
        };

        WsClientBuilder {
            err,
            origin: None,
            protocols: Vec::new(),
            inner: Some(Inner {
                uri,
                connector: (),
                method: Method::GET,
                headers: HeaderMap::new(),
                params: Vec::new(),
                timeout: Millis(5_000),
                compress: DEFAULT_WINDOW_BITS,
                client_notakeover: false,
                session: SessionConfig::default(),
                key_generator: Rc::new(RandomKey),
            }),
        }
    }
}

impl<T> WsClientBuilder<T> {
    /// Set supported websocket protocols
    pub fn protocols<U, V>(&mut self, protos: U) -> &mut Self
    where
        U: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        self.protocols = protos
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .collect();
        self
    }

    /// Set request Origin
    ///
    /// Origin header is not sent unless it is set explicitly.
    pub fn origin<V, E>(&mut self, origin: V) -> &mut Self
    where
        HeaderValue: TryFrom<V, Error = E>,
        HttpError: From<E>,
    {
        match HeaderValue::try_from(origin) {
            Ok(value) => self.origin = Some(value),
            Err(e) => self.err = Some(e.into()),
        }
        self
    }

    /// Set request method, default is `GET`
    pub fn method(&mut self, method: Method) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.method = method;
        }
        self
    }

    /// Append a header.
    ///
    /// Header gets appended to existing header.
    /// To override header use `set_header()` method.
    pub fn header<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
        <HeaderName as TryFrom<K>>::Error: Into<HttpError>,
        <HeaderValue as TryFrom<V>>::Error: Into<HttpError>,
    {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            match HeaderName::try_from(key) {
                Ok(key) => match HeaderValue::try_from(value) {
                    Ok(value) => {
                        parts.headers.append(key, value);
                    }
                    Err(e) => self.err = Some(e.into()),
                },
                Err(e) => self.err = Some(e.into()),
            }
        }
        self
    }

    /// Insert a header, replaces existing header.
    pub fn set_header<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
        <HeaderName as TryFrom<K>>::Error: Into<HttpError>,
        <HeaderValue as TryFrom<V>>::Error: Into<HttpError>,
    {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            match HeaderName::try_from(key) {
                Ok(key) => match HeaderValue::try_from(value) {
                    Ok(value) => {
                        parts.headers.insert(key, value);
                    }
                    Err(e) => self.err = Some(e.into()),
                },
                Err(e) => self.err = Some(e.into()),
            }
        }
        self
    }

    /// Insert a header only if it is not yet set.
    pub fn set_header_if_none<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
        <HeaderName as TryFrom<K>>::Error: Into<HttpError>,
        <HeaderValue as TryFrom<V>>::Error: Into<HttpError>,
    {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            match HeaderName::try_from(key) {
                Ok(key) => {
                    if !parts.headers.contains_key(&key) {
                        match HeaderValue::try_from(value) {
                            Ok(value) => {
                                parts.headers.insert(key, value);
                            }
                            Err(e) => self.err = Some(e.into()),
                        }
                    }
                }
                Err(e) => self.err = Some(e.into()),
            }
        }
        self
    }

    /// Set HTTP basic authorization header
    pub fn basic_auth<U>(&mut self, username: U, password: Option<&str>) -> &mut Self
    where
        U: fmt::Display,
    {
        self.header(AUTHORIZATION, basic_auth(username, password))
    }

    /// Set HTTP bearer authentication header
    pub fn bearer_auth<U>(&mut self, token: U) -> &mut Self
    where
        U: fmt::Display,
    {
        self.header(AUTHORIZATION, format!("Bearer {token}"))
    }

    /// Add query parameter
    pub fn param<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.params.push((key.into(), value.into()));
        }
        self
    }

    /// Set handshake timeout.
    ///
    /// Handshake timeout is the total time before a response must be received.
    /// Default value is 5 seconds, zero disables timeout.
    pub fn timeout<U: Into<Millis>>(&mut self, timeout: U) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.timeout = timeout.into();
        }
        self
    }

    /// Set default receive timeout of the session, disabled by default
    pub fn receive_timeout<U: Into<Millis>>(&mut self, timeout: U) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.session.receive_timeout = timeout.into();
        }
        self
    }

    /// Set time to wait for peer's close frame.
    ///
    /// Default value is 10 seconds, zero disables timeout.
    pub fn close_timeout<U: Into<Millis>>(&mut self, timeout: U) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.session.close_timeout = timeout.into();
        }
        self
    }

    /// Automatically answer peer's close frame, enabled by default
    pub fn autoclose(&mut self, enabled: bool) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.session.autoclose = enabled;
        }
        self
    }

    /// Automatically answer pings and skip pongs, enabled by default
    pub fn autoping(&mut self, enabled: bool) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.session.autoping = enabled;
        }
        self
    }

    /// Set requested compression window bits.
    ///
    /// Value must be in `9..=15` range, `0` disables compression.
    /// Default value is 15.
    pub fn compress(&mut self, bits: u8) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.compress = bits;
        }
        self
    }

    /// Request compression context reset after each client message
    pub fn client_no_context_takeover(&mut self, enabled: bool) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.client_notakeover = enabled;
        }
        self
    }

    /// Use custom `Sec-WebSocket-Key` generator
    pub fn key_generator<G: KeyGenerator + 'static>(&mut self, generator: G) -> &mut Self {
        if let Some(parts) = parts(&mut self.inner, &self.err) {
            parts.key_generator = Rc::new(generator);
        }
        self
    }

    /// Use custom connector
    pub fn connector<T1>(&mut self, connector: T1) -> WsClientBuilder<T1>
    where
        T1: Service<HandshakeRequest>,
        T1::Response: HandshakeResponse,
    {
        let inner = self.inner.take().expect("cannot reuse WsClient builder");

        WsClientBuilder {
            inner: Some(Inner {
                connector,
                method: inner.method,
                uri: inner.uri,
                headers: inner.headers,
                params: inner.params,
                timeout: inner.timeout,
                compress: inner.compress,
                client_notakeover: inner.client_notakeover,
                session: inner.session,
                key_generator: inner.key_generator,
            }),
            err: self.err.take(),
            protocols: std::mem::take(&mut self.protocols),
            origin: self.origin.take(),
        }
    }

    /// This method construct new `WsClientBuilder`
    pub fn take(&mut self) -> WsClientBuilder<T> {
        WsClientBuilder {
            inner: self.inner.take(),
            err: self.err.take(),
            origin: self.origin.take(),
            protocols: std::mem::take(&mut self.protocols),
        }
    }
}

impl<T> WsClientBuilder<T>
where
    T: Service<HandshakeRequest>,
    T::Response: HandshakeResponse,
{
    /// Complete building process and construct websockets client.
    pub fn finish(&mut self) -> Result<WsClient<T>, WsClientBuilderError> {
        if let Some(e) = self.err.take() {
            return Err(WsClientBuilderError::Http(e));
        }

        let mut inner = self.inner.take().expect("cannot reuse WsClient builder");

        // validate uri
        let uri = &inner.uri;
        let host = match uri.host() {
            Some(host) => host,
            None => return Err(WsClientBuilderError::MissingHost),
        };
        match uri.scheme_str() {
            Some("http" | "ws" | "https" | "wss") => (),
            Some(_) => return Err(WsClientBuilderError::UnknownScheme),
            None => return Err(WsClientBuilderError::MissingScheme),
        }

        if inner.compress != 0 && !extension::is_valid_window_bits(inner.compress) {
            return Err(WsClientBuilderError::InvalidCompress(inner.compress));
        }

        if !inner.headers.contains_key(header::HOST) {
            inner
                .headers
                .insert(header::HOST, HeaderValue::try_from(host).map_err(HttpError::from)?);
        }

        // origin
        if let Some(origin) = self.origin.take() {
            inner.headers.insert(header::ORIGIN, origin);
        }

        inner
            .headers
            .insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        inner
            .headers
            .insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
        inner.headers.insert(
            header::SEC_WEBSOCKET_VERSION,
            HeaderValue::from_static("13"),
        );

        if !self.protocols.is_empty() {
            let protocols = self.protocols.join(",");
            inner.headers.insert(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::try_from(protocols).map_err(HttpError::from)?,
            );
        }

        if inner.compress != 0 {
            let offer = extension::offer(inner.compress, inner.client_notakeover);
            inner.headers.insert(
                header::SEC_WEBSOCKET_EXTENSIONS,
                HeaderValue::try_from(offer).map_err(HttpError::from)?,
            );
        }

        Ok(WsClient {
            connector: Pipeline::new(inner.connector),
            method: inner.method,
            uri: inner.uri,
            headers: inner.headers,
            params: inner.params,
            protocols: std::mem::take(&mut self.protocols),
            timeout: inner.timeout,
            compress: inner.compress,
            session: inner.session,
            key_generator: inner.key_generator,
            extra_headers: RefCell::new(None),
        })
    }
}

#[inline]
fn parts<'a, T>(
    parts: &'a mut Option<Inner<T>>,
    err: &Option<HttpError>,
) -> Option<&'a mut Inner<T>> {
    if err.is_some() {
        return None;
    }
    parts.as_mut()
}

impl<T> fmt::Debug for WsClientBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref parts) = self.inner {
            writeln!(f, "\nWsClientBuilder {}:{}", parts.method, parts.uri)?;
            writeln!(f, "  headers:")?;
            for (key, val) in parts.headers.iter() {
                writeln!(f, "    {key:?}: {val:?}")?;
            }
        } else {
            writeln!(f, "WsClientBuilder(Consumed)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtensionError;
    use crate::test::{TestConnector, TestResponse};

    #[test]
    fn test_builder_errors() {
        let connector = TestConnector::accept();

        let err = WsClient::with_connector("/path", connector.clone())
            .finish()
            .unwrap_err();
        assert!(matches!(err, WsClientBuilderError::MissingHost));

        let err = WsClient::with_connector("ftp://example.com", connector.clone())
            .finish()
            .unwrap_err();
        assert!(matches!(err, WsClientBuilderError::UnknownScheme));

        let err = WsClient::with_connector("ws://example.com", connector.clone())
            .compress(8)
            .finish()
            .unwrap_err();
        assert!(matches!(err, WsClientBuilderError::InvalidCompress(8)));

        let err = WsClient::with_connector("ws://example.com", connector.clone())
            .header("x-test", "bad\nvalue")
            .finish()
            .unwrap_err();
        assert!(matches!(err, WsClientBuilderError::Http(_)));

        let err = WsClient::with_connector("ws://example.com", connector)
            .origin("bad\nvalue")
            .finish()
            .unwrap_err();
        assert!(matches!(err, WsClientBuilderError::Http(_)));
    }

    #[test]
    fn test_request_headers() {
        let client = WsClient::build("ws://example.com/ws")
            .protocols(["chat", "superchat"])
            .compress(10)
            .client_no_context_takeover(true)
            .bearer_auth("token")
            .param("a", "b")
            .key_generator(|| [1u8; 16])
            .connector(TestConnector::accept())
            .finish()
            .unwrap();
        assert!(format!("{client:?}").contains("WsClient"));

        let (req, key) = client.request().unwrap();
        assert_eq!(key, "AQEBAQEBAQEBAQEBAQEBAQ==");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.params, vec![("a".to_string(), "b".to_string())]);
        assert!(!req.follow_redirects);
        assert!(!req.decompress);
        assert_eq!(req.timeout, Millis(5_000));

        let h = |name: HeaderName| req.headers.get(name).unwrap().to_str().unwrap().to_string();
        assert_eq!(h(header::UPGRADE), "websocket");
        assert_eq!(h(header::CONNECTION), "Upgrade");
        assert_eq!(h(header::SEC_WEBSOCKET_VERSION), "13");
        assert_eq!(h(header::SEC_WEBSOCKET_KEY), key);
        assert_eq!(h(header::SEC_WEBSOCKET_PROTOCOL), "chat,superchat");
        assert_eq!(h(header::HOST), "example.com");
        assert_eq!(h(AUTHORIZATION), "Bearer token");
        assert_eq!(
            h(header::SEC_WEBSOCKET_EXTENSIONS),
            "permessage-deflate; client_max_window_bits=10; client_no_context_takeover"
        );
        assert!(!req.headers.contains_key(header::ORIGIN));
    }

    #[test]
    fn test_no_compress_offer() {
        let client = WsClient::with_connector("wss://example.com", TestConnector::accept())
            .compress(0)
            .origin("http://example.com")
            .basic_auth("user", Some("pass"))
            .finish()
            .unwrap();
        let (req, _) = client.request().unwrap();
        assert!(!req.headers.contains_key(header::SEC_WEBSOCKET_EXTENSIONS));
        assert!(!req.headers.contains_key(header::SEC_WEBSOCKET_PROTOCOL));
        assert_eq!(
            req.headers.get(header::ORIGIN).unwrap().to_str().unwrap(),
            "http://example.com"
        );
        assert_eq!(
            req.headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Basic dXNlcjpwYXNz"
        );
    }

    #[test]
    fn test_extra_headers() {
        let client = WsClient::with_connector("ws://example.com", TestConnector::accept())
            .finish()
            .unwrap();
        client.set_bearer_auth("first").unwrap();
        client.set_header("x-extra", "1").unwrap();
        client.set_basic_auth("user", None).unwrap();

        for _ in 0..2 {
            let (req, _) = client.request().unwrap();
            assert_eq!(
                req.headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
                "Basic dXNlcjo="
            );
            assert!(req.headers.contains_key("x-extra"));
        }
        assert!(client.set_header("x-bad", "a\nb").is_err());
    }

    #[test]
    fn test_extra_headers_keep_handshake() {
        let client = WsClient::with_connector("ws://example.com", TestConnector::accept())
            .protocols(["chat"])
            .compress(10)
            .key_generator(|| [2u8; 16])
            .finish()
            .unwrap();
        client.set_header(header::UPGRADE, "h2c").unwrap();
        client.set_header(header::CONNECTION, "close").unwrap();
        client.set_header(header::SEC_WEBSOCKET_VERSION, "8").unwrap();
        client.set_header(header::SEC_WEBSOCKET_KEY, "stale").unwrap();
        client.set_header(header::SEC_WEBSOCKET_PROTOCOL, "other").unwrap();
        client.set_header(header::SEC_WEBSOCKET_EXTENSIONS, "x-custom").unwrap();
        client.set_header(header::ORIGIN, "http://example.com").unwrap();

        let (req, key) = client.request().unwrap();
        let h = |name: HeaderName| req.headers.get(name).unwrap().to_str().unwrap().to_string();
        assert_eq!(h(header::UPGRADE), "websocket");
        assert_eq!(h(header::CONNECTION), "Upgrade");
        assert_eq!(h(header::SEC_WEBSOCKET_VERSION), "13");
        assert_eq!(h(header::SEC_WEBSOCKET_KEY), key);
        assert_eq!(h(header::SEC_WEBSOCKET_PROTOCOL), "chat");
        assert_eq!(
            h(header::SEC_WEBSOCKET_EXTENSIONS),
            "permessage-deflate; client_max_window_bits=10"
        );
        assert_eq!(h(header::ORIGIN), "http://example.com");
    }

    fn check(
        res: TestResponse,
        protocols: &[&str],
        compress: u8,
    ) -> Result<Negotiated, HandshakeError> {
        let protocols: Vec<String> = protocols.iter().map(|s| s.to_string()).collect();
        validate(&res, "dGhlIHNhbXBsZSBub25jZQ==", &protocols, compress)
    }

    fn valid() -> TestResponse {
        TestResponse::switching("dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[test]
    fn test_validate_order() {
        // every check fails, status is reported
        let res = TestResponse::new(StatusCode::OK).header(header::CONNECTION, "close");
        assert_eq!(
            check(res, &[], 15),
            Err(HandshakeError::InvalidResponseStatus(StatusCode::OK))
        );

        // status is fine, upgrade and connection are wrong
        let res = valid()
            .set_header(header::UPGRADE, "h2c")
            .set_header(header::CONNECTION, "close");
        assert_eq!(check(res, &[], 15), Err(HandshakeError::InvalidUpgradeHeader));

        // connection and accept are wrong
        let res = valid()
            .set_header(header::CONNECTION, "close")
            .set_header(header::SEC_WEBSOCKET_ACCEPT, "bad");
        assert!(matches!(
            check(res, &[], 15),
            Err(HandshakeError::InvalidConnectionHeader(_))
        ));
    }

    #[test]
    fn test_validate_headers() {
        assert!(check(valid(), &[], 15).is_ok());
        assert!(check(valid().set_header(header::UPGRADE, "WebSocket"), &[], 15).is_ok());
        assert!(check(
            valid().set_header(header::CONNECTION, "keep-alive, Upgrade"),
            &[],
            15
        )
        .is_ok());

        assert_eq!(
            check(valid().remove_header(header::CONNECTION), &[], 15),
            Err(HandshakeError::InvalidConnectionHeader(None))
        );
        assert!(matches!(
            check(valid().set_header(header::CONNECTION, "close"), &[], 15),
            Err(HandshakeError::InvalidConnectionHeader(Some(_)))
        ));
        assert!(matches!(
            check(valid().remove_header(header::SEC_WEBSOCKET_ACCEPT), &[], 15),
            Err(HandshakeError::InvalidChallengeResponse(_, None))
        ));
        assert!(matches!(
            check(valid().set_header(header::SEC_WEBSOCKET_ACCEPT, "bad"), &[], 15),
            Err(HandshakeError::InvalidChallengeResponse(_, Some(_)))
        ));
    }

    #[test]
    fn test_validate_protocol() {
        let res = valid().header(header::SEC_WEBSOCKET_PROTOCOL, "other, chat, t1");
        let neg = check(res, &["t1", "t2", "chat"], 15).unwrap();
        assert_eq!(neg.protocol.as_deref(), Some("chat"));

        let res = valid().header(header::SEC_WEBSOCKET_PROTOCOL, "other,another");
        let neg = check(res, &["t1", "t2", "chat"], 15).unwrap();
        assert_eq!(neg.protocol, None);

        let res = valid().header(header::SEC_WEBSOCKET_PROTOCOL, "chat");
        assert_eq!(check(res, &[], 15).unwrap().protocol, None);
    }

    #[test]
    fn test_validate_compress() {
        let res = valid().header(header::SEC_WEBSOCKET_EXTENSIONS, "permessage-deflate");
        let neg = check(res, &[], 15).unwrap();
        assert_eq!(neg.compress, 15);
        assert!(!neg.client_no_context_takeover);

        let res = valid().header(
            header::SEC_WEBSOCKET_EXTENSIONS,
            "permessage-deflate; client_max_window_bits=6",
        );
        assert_eq!(
            check(res.clone(), &[], 15),
            Err(HandshakeError::InvalidCompressionNotification(
                ExtensionError::InvalidWindowSize("6".to_string())
            ))
        );
        // compression is not requested
        assert_eq!(check(res, &[], 0).unwrap().compress, 0);

        assert_eq!(check(valid(), &[], 15).unwrap().compress, 0);
    }
}
