use crate::{
    config::ServerConfig,
    errors::ErrorKind,
    http::{
        headers::Headers,
        query::{self, Query},
        types,
    },
    Method, Version,
};
use memchr::memmem;
use std::{
    fs, io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::NamedTempFile;

/// An HTTP request, complete and immutable once handed to a controller.
///
/// # Input data requirements
///
/// The request head (request line and headers) must be UTF-8 and use exactly
/// `CRLF` line endings; anything else is answered with `400 Bad Request`.
///
/// #### General designations
/// - `SP`: ASCII space (0x20)
/// - `CRLF`: Carriage return + line feed (`"\r\n"`)
///
/// ## First line
/// ```text
/// [METHOD] SP [TARGET] SP "HTTP/1." ("0" | "1") CRLF
/// ```
/// `[TARGET]` is an origin-form path starting with `/`, optionally followed
/// by `?` and a query. The path is percent-decoded into [`path`](Self::path);
/// the query is kept raw in [`query`](Self::query).
///
/// ## Header
/// ```text
/// [NAME] ":" [OWS] [VALUE] [OWS] CRLF
/// ```
/// Every header is kept in [`headers`](Self::headers). The parser also
/// interprets three of them:
///
/// | Header              | Effect                                                       |
/// |---------------------|--------------------------------------------------------------|
/// | `Content-Length`    | Body size; above the upload limit the answer is `413`        |
/// | `Connection`        | `keep-alive` / `close` override the version default          |
/// | `Transfer-Encoding` | Not supported, answered with `501`                           |
///
/// ## Body
///
/// Only `Content-Length` framed bodies are read. Bodies above the spool
/// threshold are written to a temporary file instead of memory; use
/// [`body_path`](Self::body_path) or [`read_body`](Self::read_body) for those.
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    path: String,
    query: String,
    version: Version,

    headers: Headers,
    content_length: Option<usize>,
    keep_alive: bool,

    body: Body,

    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

#[derive(Debug)]
enum Body {
    Empty,
    Memory(Vec<u8>),
    Spooled(NamedTempFile),
}

impl Request {
    const UNKNOWN_CLIENT: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    const DEFAULT_SERVER: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

    /// Builds a request by hand, e.g. to unit test a controller.
    ///
    /// ```
    /// use embed_web::{Method, Request};
    ///
    /// let request = Request::new(Method::Get, "/files/a%20b.txt?dl=1")
    ///     .unwrap()
    ///     .with_header("Accept", "*/*");
    ///
    /// assert_eq!(request.path(), "/files/a b.txt");
    /// assert_eq!(request.query(), "dl=1");
    /// assert_eq!(request.header("accept"), Some("*/*"));
    /// ```
    pub fn new(method: Method, target: &str) -> Result<Self, ErrorKind> {
        let (path, query) = split_target(target)?;

        Ok(Request {
            method,
            target: target.to_string(),
            path,
            query,
            version: Version::Http11,

            headers: Headers::new(),
            content_length: None,
            keep_alive: true,

            body: Body::Empty,

            client_addr: Self::UNKNOWN_CLIENT,
            server_addr: Self::DEFAULT_SERVER,
        })
    }

    /// Appends a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the body, keeping `Content-Length` in line with it.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        self.content_length = Some(body.len());
        self.body = match body.is_empty() {
            true => Body::Empty,
            false => Body::Memory(body),
        };
        self
    }

    /// Sets the peer address.
    pub fn with_client_addr(mut self, addr: SocketAddr) -> Self {
        self.client_addr = addr;
        self
    }
}

// Public API
impl Request {
    /// Address of the peer.
    #[inline(always)]
    pub const fn client_addr(&self) -> &SocketAddr {
        &self.client_addr
    }

    /// Local address the connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> &SocketAddr {
        &self.server_addr
    }

    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request target exactly as received, e.g. `/a%20b?x=1`.
    #[inline(always)]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Percent-decoded path, e.g. `/a b`.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`; empty when absent.
    #[inline(always)]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Decoded query parameters in order.
    pub fn query_params(&self) -> Result<Vec<(String, String)>, query::Error> {
        Query::parse(&self.query, Self::PARAM_LIMIT)
    }

    /// Decoded `application/x-www-form-urlencoded` body parameters.
    ///
    /// Spooled bodies are read back from disk.
    pub fn form_params(&self) -> Result<Vec<(String, String)>, ErrorKind> {
        let body = self.read_body()?;
        let body = simdutf8::basic::from_utf8(&body).map_err(|_| ErrorKind::InvalidHeader)?;
        Query::parse(body, Self::PARAM_LIMIT).map_err(|_| ErrorKind::InvalidUrl)
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    #[inline(always)]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of header `name`, compared case-insensitively.
    #[inline(always)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    /// Whether the client asked to keep the connection open.
    #[inline(always)]
    pub const fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The body if it was kept in memory; empty when there is none or when it
    /// was spooled to disk.
    pub fn body(&self) -> &[u8] {
        match &self.body {
            Body::Memory(bytes) => bytes,
            Body::Empty | Body::Spooled(_) => &[],
        }
    }

    /// Path of the temporary file holding a spooled body.
    ///
    /// The file is removed when the request is dropped.
    pub fn body_path(&self) -> Option<&Path> {
        match &self.body {
            Body::Spooled(file) => Some(file.path()),
            Body::Empty | Body::Memory(_) => None,
        }
    }

    /// The whole body, wherever it is stored.
    pub fn read_body(&self) -> io::Result<Vec<u8>> {
        match &self.body {
            Body::Empty => Ok(Vec::new()),
            Body::Memory(bytes) => Ok(bytes.clone()),
            Body::Spooled(file) => fs::read(file.path()),
        }
    }

    const PARAM_LIMIT: usize = 256;
}

fn split_target(target: &str) -> Result<(String, String), ErrorKind> {
    if !target.starts_with('/') || target.bytes().any(|b| b.is_ascii_whitespace()) {
        return Err(ErrorKind::InvalidUrl);
    }

    let (raw_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };
    let path = urlencoding::decode(raw_path).map_err(|_| ErrorKind::InvalidUrl)?;

    if path.contains('\0') {
        return Err(ErrorKind::InvalidUrl);
    }

    Ok((path.into_owned(), query.to_string()))
}

/// Limits the parser enforces, fixed for the lifetime of a started server.
#[derive(Debug, Clone)]
pub(crate) struct ParseLimits {
    pub(crate) head_size: usize,
    pub(crate) header_count: usize,
    pub(crate) spool_threshold: usize,
    pub(crate) upload_size_limit: usize,
    pub(crate) tmp_dir: PathBuf,
}

impl ParseLimits {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        ParseLimits {
            head_size: config.request_limits.head_size,
            header_count: config.request_limits.header_count,
            spool_threshold: config.request_limits.spool_threshold,
            upload_size_limit: config.upload_size_limit,
            tmp_dir: config.tmp_dir.clone(),
        }
    }
}

/// Incremental request parser.
///
/// Bytes are [fed](Parser::feed) as they arrive and [advance](Parser::advance)
/// yields a request once its head and body are complete. Bytes past the end
/// of that request stay buffered for the next one.
#[derive(Debug)]
pub(crate) struct Parser {
    buffer: Vec<u8>,
    limits: Arc<ParseLimits>,
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    request: Request,
    remaining: usize,
    sink: Sink,
}

#[derive(Debug)]
enum Sink {
    Memory(Vec<u8>),
    File(NamedTempFile),
}

impl Parser {
    const HEAD_END: &'static [u8] = b"\r\n\r\n";

    pub(crate) fn new(limits: Arc<ParseLimits>) -> Self {
        Parser {
            buffer: Vec::new(),
            limits,
            pending: None,
        }
    }

    #[inline]
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed.
    #[inline]
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parses as far as the buffered bytes allow.
    ///
    /// Returns `Ok(None)` while more bytes are needed. After an error the
    /// parser state is unspecified and the connection must be closed.
    pub(crate) fn advance(&mut self) -> Result<Option<Request>, ErrorKind> {
        if self.pending.is_none() {
            let Some(request) = self.parse_head()? else {
                return Ok(None);
            };

            match request.content_length {
                None | Some(0) => return Ok(Some(request)),
                Some(len) => {
                    let sink = match len > self.limits.spool_threshold {
                        true => Sink::File(NamedTempFile::new_in(&self.limits.tmp_dir)?),
                        false => Sink::Memory(Vec::with_capacity(len)),
                    };

                    self.pending = Some(Pending {
                        request,
                        remaining: len,
                        sink,
                    });
                }
            }
        }

        self.read_body()
    }

    fn parse_head(&mut self) -> Result<Option<Request>, ErrorKind> {
        let Some(end) = memmem::find(&self.buffer, Self::HEAD_END) else {
            if self.buffer.len() > self.limits.head_size {
                return Err(ErrorKind::HeadTooLarge);
            }
            return Ok(None);
        };

        let head_len = end + Self::HEAD_END.len();
        if head_len > self.limits.head_size {
            return Err(ErrorKind::HeadTooLarge);
        }

        let head = simdutf8::basic::from_utf8(&self.buffer[..end])
            .map_err(|_| ErrorKind::InvalidHeader)?;
        let request = parse_head(head, &self.limits)?;

        self.buffer.drain(..head_len);
        Ok(Some(request))
    }

    fn read_body(&mut self) -> Result<Option<Request>, ErrorKind> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };

        let take = pending.remaining.min(self.buffer.len());
        if take > 0 {
            match &mut pending.sink {
                Sink::Memory(bytes) => bytes.extend_from_slice(&self.buffer[..take]),
                Sink::File(file) => io::Write::write_all(file, &self.buffer[..take])?,
            }
            self.buffer.drain(..take);
            pending.remaining -= take;
        }

        if pending.remaining > 0 {
            return Ok(None);
        }

        let Some(Pending {
            mut request, sink, ..
        }) = self.pending.take()
        else {
            return Ok(None);
        };

        request.body = match sink {
            Sink::Memory(bytes) => Body::Memory(bytes),
            Sink::File(mut file) => {
                io::Write::flush(&mut file)?;
                Body::Spooled(file)
            }
        };

        Ok(Some(request))
    }

    /// Drops buffered bytes and any half-read request.
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    /// Takes the unconsumed bytes, leaving the parser empty.
    #[cfg(test)]
    pub(crate) fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

fn parse_head(head: &str, limits: &ParseLimits) -> Result<Request, ErrorKind> {
    let mut lines = head.split("\r\n");
    let first_line = lines.next().unwrap_or_default();

    let mut parts = first_line.splitn(3, ' ');
    let method = parts
        .next()
        .ok_or(ErrorKind::InvalidMethod)
        .and_then(|token| Method::from_bytes(token.as_bytes()))?;
    let target = parts.next().ok_or(ErrorKind::InvalidUrl)?;
    let (version, keep_alive) = parts
        .next()
        .ok_or(ErrorKind::InvalidVersion)
        .and_then(|token| Version::from_bytes(token.as_bytes()))?;

    let mut request = Request::new(method, target)?;
    request.version = version;
    request.keep_alive = keep_alive;

    for line in lines {
        if request.headers.len() >= limits.header_count {
            return Err(ErrorKind::TooManyHeaders);
        }

        let (name, value) = line.split_once(':').ok_or(ErrorKind::InvalidHeader)?;
        if name.is_empty() || !name.bytes().all(is_token) || value.contains(['\r', '\n']) {
            return Err(ErrorKind::InvalidHeader);
        }
        let value = value.trim_matches([' ', '\t']);

        request.interpret_header(name, value, limits)?;
        request.headers.append(name, value);
    }

    Ok(request)
}

impl Request {
    fn interpret_header(
        &mut self,
        name: &str,
        value: &str,
        limits: &ParseLimits,
    ) -> Result<(), ErrorKind> {
        if name.eq_ignore_ascii_case("content-length") {
            let len = types::slice_to_usize(value.as_bytes())
                .ok_or(ErrorKind::InvalidContentLength)?;

            if self.content_length.is_some_and(|prev| prev != len) {
                return Err(ErrorKind::InvalidContentLength);
            }
            if len > limits.upload_size_limit {
                return Err(ErrorKind::BodyTooLarge);
            }
            self.content_length = Some(len);
        } else if name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    self.keep_alive = false;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    self.keep_alive = true;
                }
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(ErrorKind::UnsupportedTransferEncoding);
        }

        Ok(())
    }
}

// RFC 9110, Section 5.6.2
#[inline(always)]
fn is_token(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> Arc<ParseLimits> {
        Arc::new(ParseLimits::new(&ServerConfig::default()))
    }

    fn parse(src: &[u8]) -> Result<Option<Request>, ErrorKind> {
        let mut parser = Parser::new(limits());
        parser.feed(src);
        parser.advance()
    }

    macro_rules! parse_request {
        ($cases:expr) => {
            for (src, expected) in $cases {
                let result = parse(src.as_bytes());
                match expected {
                    Ok((method, path, version, headers, body, keep_alive)) => {
                        let request = result
                            .unwrap_or_else(|err| panic!("{src:?}: {err:?}"))
                            .unwrap_or_else(|| panic!("{src:?}: incomplete"));

                        assert_eq!(request.method(), method, "{src:?}");
                        assert_eq!(request.path(), path, "{src:?}");
                        assert_eq!(request.version(), version, "{src:?}");
                        assert_eq!(
                            request.headers().iter().collect::<Vec<_>>(),
                            headers,
                            "{src:?}"
                        );
                        assert_eq!(request.body(), body.as_bytes(), "{src:?}");
                        assert_eq!(request.is_keep_alive(), keep_alive, "{src:?}");
                    }
                    Err(err) => assert_eq!(result.map(|_| ()), Err(err), "{src:?}"),
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases: Vec<(&str, Result<(Method, &str, Version, Vec<(&str, &str)>, &str, bool), ErrorKind>)> = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/", Version::Http11, vec![], "", true)),
            ),
            (
                "GET /api/qwe/name/len/qwe HTTP/1.1\r\n\r\n",
                Ok((Method::Get, "/api/qwe/name/len/qwe", Version::Http11, vec![], "", true)),
            ),
            (
                "POST /test HTTP/1.1\r\nHOST: 127.0.0.1\r\n\r\n",
                Ok((Method::Post, "/test", Version::Http11, vec![("HOST", "127.0.0.1")], "", true)),
            ),
            (
                "PUT /qwe HTTP/1.1\r\nHoSt:127.0.0.1\r\nUser-Agent:  curl \r\n\r\n",
                Ok((
                    Method::Put, "/qwe", Version::Http11,
                    vec![("HoSt", "127.0.0.1"), ("User-Agent", "curl")],
                    "", true,
                )),
            ),
            (
                "GET /file HTTP/1.1\r\ncontent-length: 12\r\n\r\nHello world!",
                Ok((
                    Method::Get, "/file", Version::Http11,
                    vec![("content-length", "12")],
                    "Hello world!", true,
                )),
            ),
            (
                "OPTIONS / HTTP/1.1\r\nCoNNEctIon: close\r\n\r\n",
                Ok((Method::Options, "/", Version::Http11, vec![("CoNNEctIon", "close")], "", false)),
            ),
            (
                "PATCH / HTTP/1.0\r\nconnection: keep-alive\r\n\r\n",
                Ok((Method::Patch, "/", Version::Http10, vec![("connection", "keep-alive")], "", true)),
            ),
            (
                "GET / HTTP/1.0\r\n\r\n",
                Ok((Method::Get, "/", Version::Http10, vec![], "", false)),
            ),
            (
                "GET /a%20b/c%2Fd?x=%20 HTTP/1.1\r\nX-Empty:\r\n\r\n",
                Ok((Method::Get, "/a b/c/d", Version::Http11, vec![("X-Empty", "")], "", true)),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases: Vec<(&str, Result<(Method, &str, Version, Vec<(&str, &str)>, &str, bool), ErrorKind>)> = vec![
            ("get / HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidMethod)),
            ("TRACE / HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidMethod)),
            ("GET\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET /\r\n\r\n", Err(ErrorKind::InvalidVersion)),
            ("GET / HTTP/2.0\r\n\r\n", Err(ErrorKind::UnsupportedVersion)),
            ("GET / HTPP/1.1\r\n\r\n", Err(ErrorKind::InvalidVersion)),
            ("GET api HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET /%FF HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET /a%00 HTTP/1.1\r\n\r\n", Err(ErrorKind::InvalidUrl)),
            ("GET / HTTP/1.1\r\nNoColon\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\n: value\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nBad Name: value\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nA: b\nC: d\r\n\r\n", Err(ErrorKind::InvalidHeader)),
            ("GET / HTTP/1.1\r\nContent-Length: abc\r\n\r\n", Err(ErrorKind::InvalidContentLength)),
            (
                "GET / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n",
                Err(ErrorKind::InvalidContentLength),
            ),
            (
                "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
                Err(ErrorKind::UnsupportedTransferEncoding),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\n",
                Err(ErrorKind::BodyTooLarge),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn non_utf8_head() {
        assert_eq!(
            parse(b"GET / HTTP/1.1\r\nX-Bin: \xFF\xFE\r\n\r\n").map(|_| ()),
            Err(ErrorKind::InvalidHeader)
        );
    }

    #[test]
    fn check_limits() {
        let mut parser = Parser::new(Arc::new(ParseLimits {
            header_count: 2,
            ..ParseLimits::new(&ServerConfig::default())
        }));
        parser.feed(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");
        assert_eq!(parser.advance().map(|_| ()), Err(ErrorKind::TooManyHeaders));

        let mut parser = Parser::new(Arc::new(ParseLimits {
            head_size: 32,
            ..ParseLimits::new(&ServerConfig::default())
        }));
        parser.feed(b"GET /");
        assert!(matches!(parser.advance(), Ok(None)));
        parser.feed(&[b'a'; 64]);
        assert_eq!(parser.advance().map(|_| ()), Err(ErrorKind::HeadTooLarge));
    }

    #[test]
    fn incremental_feed() {
        let mut parser = Parser::new(limits());
        let src = b"POST /upload HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world";

        for chunk in src.chunks(5) {
            assert!(matches!(parser.advance(), Ok(None)));
            parser.feed(chunk);
        }

        let request = parser.advance().unwrap().unwrap();
        assert_eq!(request.body(), b"hello world");
        assert_eq!(request.content_length(), Some(11));
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn pipelined_bytes_stay_buffered() {
        let mut parser = Parser::new(limits());
        parser.feed(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n");

        assert_eq!(parser.advance().unwrap().unwrap().path(), "/one");
        assert_eq!(parser.buffered(), 21);
        assert_eq!(parser.advance().unwrap().unwrap().path(), "/two");
        assert!(parser.take_buffer().is_empty());
    }

    #[test]
    fn large_bodies_are_spooled() {
        let dir = tempfile::tempdir().unwrap();
        let mut parser = Parser::new(Arc::new(ParseLimits {
            spool_threshold: 4,
            tmp_dir: dir.path().to_path_buf(),
            ..ParseLimits::new(&ServerConfig::default())
        }));

        parser.feed(b"PUT /f HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789");
        let request = parser.advance().unwrap().unwrap();

        let path = request.body_path().unwrap().to_path_buf();
        assert!(path.starts_with(dir.path()));
        assert!(request.body().is_empty());
        assert_eq!(request.read_body().unwrap(), b"0123456789");

        drop(request);
        assert!(!path.exists());
    }

    #[test]
    fn query_and_form_params() {
        let request = Request::new(Method::Post, "/search?q=rust+lang&page=2")
            .unwrap()
            .with_body("name=J%C3%B6rg&tag=a&tag=b");

        assert_eq!(request.query(), "q=rust+lang&page=2");
        assert_eq!(
            request.query_params().unwrap(),
            [("q".to_string(), "rust lang".to_string()), ("page".to_string(), "2".to_string())]
        );
        assert_eq!(request.form_params().unwrap().len(), 3);
        assert_eq!(request.form_params().unwrap()[0].1, "Jörg");
    }
}
