//! HTTP response builder shared by the filter, the controllers and the
//! server's own gates.

use crate::{
    http::{
        headers::Headers,
        types::{StatusCode, Version},
    },
    BodyWriter, WriteBuffer,
};
use std::io::Write;

/// HTTP response under construction.
///
/// Starts as an empty `200 OK`. The filter, a controller or the access gates
/// fill it in with chained calls; the server then finalizes it exactly once,
/// adding `content-length`, `connection` and the configured extra headers.
///
/// # Examples
/// ```
/// use embed_web::{Response, StatusCode};
///
/// let mut resp = Response::new();
/// resp.status(StatusCode::Created)
///     .header("content-type", "text/html")
///     .header("x-items", 3)
///     .body("<h1>Hello World</h1>");
///
/// assert_eq!(resp.status_code(), StatusCode::Created);
/// assert_eq!(resp.headers().get("X-Items"), Some("3"));
/// assert_eq!(resp.body_bytes(), b"<h1>Hello World</h1>");
/// ```
///
/// # Panics
/// Every builder method panics in `debug` mode once the response has been
/// finalized by the server.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    close: bool,
    state: ResponseState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseState {
    Building,
    Finalized,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: Vec::new(),
            close: false,
            state: ResponseState::Building,
        }
    }

    #[inline(always)]
    #[track_caller]
    fn check_building(&self) {
        debug_assert!(
            self.state == ResponseState::Building,
            "Response is already finalized"
        );
    }
}

// Builder
impl Response {
    /// Sets the status code (default: `200 OK`).
    #[inline]
    #[track_caller]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.check_building();
        self.status = status;
        self
    }

    /// Appends a header, keeping earlier ones with the same name.
    ///
    /// `content-length` and `connection` are managed by the server and are
    /// dropped at finalization.
    ///
    /// # Panics
    /// In `debug` mode, if the value contains `CR` or `LF`.
    #[inline]
    #[track_caller]
    pub fn header<V: WriteBuffer>(&mut self, name: &str, value: V) -> &mut Self {
        self.check_building();
        let value = Self::header_value(value);
        self.headers.append(name, value);
        self
    }

    /// Sets a header, replacing every earlier value with the same name.
    #[inline]
    #[track_caller]
    pub fn set_header<V: WriteBuffer>(&mut self, name: &str, value: V) -> &mut Self {
        self.check_building();
        let value = Self::header_value(value);
        self.headers.set(name, value);
        self
    }

    /// Replaces the body.
    #[inline]
    #[track_caller]
    pub fn body<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        self.check_building();
        self.body.clear();
        data.write_to(&mut self.body);
        self
    }

    /// Appends to the body.
    #[inline]
    #[track_caller]
    pub fn append<T: WriteBuffer>(&mut self, data: T) -> &mut Self {
        self.check_building();
        data.write_to(&mut self.body);
        self
    }

    /// Replaces the body with whatever `f` writes.
    ///
    /// ```
    /// use embed_web::Response;
    /// use std::io::Write;
    ///
    /// let mut resp = Response::new();
    /// resp.body_with(|w| {
    ///     w.write("total: ");
    ///     write!(w, "{}", 6 * 7).unwrap();
    /// });
    /// assert_eq!(resp.body_bytes(), b"total: 42");
    /// ```
    #[inline]
    #[track_caller]
    pub fn body_with<F: FnOnce(&mut BodyWriter)>(&mut self, f: F) -> &mut Self {
        self.check_building();
        self.body.clear();
        f(&mut BodyWriter(&mut self.body));
        self
    }

    /// Forces the connection to close after this response.
    #[inline]
    #[track_caller]
    pub fn close(&mut self) -> &mut Self {
        self.check_building();
        self.close = true;
        self
    }

    fn header_value<V: WriteBuffer>(value: V) -> String {
        let mut bytes = Vec::new();
        value.write_to(&mut bytes);
        debug_assert!(
            !bytes.iter().any(|b| matches!(b, b'\r' | b'\n')),
            "Header values must not contain CR or LF"
        );

        match String::from_utf8(bytes) {
            Ok(value) => value,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }
}

// Accessors
impl Response {
    #[inline(always)]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    #[inline(always)]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline(always)]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Whether [`close`](Self::close) was called.
    #[inline(always)]
    pub fn is_close(&self) -> bool {
        self.close
    }
}

/// What the transport receives for a finished response.
#[derive(Debug, PartialEq)]
pub(crate) struct Finalized {
    pub(crate) bytes: Vec<u8>,
    pub(crate) keep_alive: bool,
}

impl Response {
    /// Serializes the response. Runs exactly once per response.
    ///
    /// `keep_alive` is what the request asked for; a forced
    /// [`close`](Self::close) overrides it. With `head_only` the
    /// `content-length` of the body is sent but the body is not.
    #[track_caller]
    pub(crate) fn finalize(
        &mut self,
        version: Version,
        keep_alive: bool,
        extra_headers: &[(String, String)],
        head_only: bool,
    ) -> Finalized {
        debug_assert!(
            self.state == ResponseState::Building,
            "A response is finalized exactly once"
        );
        self.state = ResponseState::Finalized;

        let keep_alive = keep_alive && !self.close;
        let mut out = Vec::with_capacity(128 + self.body.len());

        let _ = write!(out, "{} {}\r\n", version.as_str(), self.status);

        for (name, value) in self.headers.iter() {
            if Self::is_managed(name) {
                continue;
            }
            Self::write_field(&mut out, name, value);
        }
        for (name, value) in extra_headers {
            if Self::is_managed(name) || self.headers.contains(name) {
                continue;
            }
            Self::write_field(&mut out, name, value);
        }

        if let Some(value) = Self::connection_header(version, keep_alive) {
            Self::write_field(&mut out, "connection", value);
        }
        let _ = write!(out, "content-length: {}\r\n\r\n", self.body.len());

        if !head_only {
            out.extend_from_slice(&self.body);
        }

        Finalized {
            bytes: out,
            keep_alive,
        }
    }

    #[inline(always)]
    const fn connection_header(version: Version, keep_alive: bool) -> Option<&'static str> {
        match (version, keep_alive) {
            (Version::Http11, true) => None,
            (Version::Http11, false) => Some("close"),
            (Version::Http10, true) => Some("keep-alive"),
            (Version::Http10, false) => Some("close"),
        }
    }

    #[inline(always)]
    fn is_managed(name: &str) -> bool {
        name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("connection")
    }

    fn write_field(out: &mut Vec<u8>, name: &str, value: &str) {
        if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
            tracing::warn!(name, "dropping header with line breaks");
            return;
        }

        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

pub mod write {
    use std::{borrow::Cow, rc::Rc, sync::Arc};

    /// Writer for the response body, used in
    /// [`body_with`](super::Response::body_with).
    ///
    /// Accepts anything implementing [`WriteBuffer`] and also implements
    /// [`std::io::Write`], so `write!` works.
    #[derive(Debug)]
    pub struct BodyWriter<'a>(pub(crate) &'a mut Vec<u8>);

    impl BodyWriter<'_> {
        /// Appends content to the body.
        #[inline]
        pub fn write<T: WriteBuffer>(&mut self, value: T) {
            value.write_to(self.0);
        }
    }

    impl std::io::Write for BodyWriter<'_> {
        #[inline]
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }

        #[inline]
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Values that can be written into a response body or header.
    ///
    /// Implemented for strings, byte slices, booleans, chars and integers.
    /// Floats are not; format them with the precision you need.
    ///
    /// ```
    /// use embed_web::WriteBuffer;
    ///
    /// struct Celsius(i32);
    ///
    /// impl WriteBuffer for Celsius {
    ///     fn write_to(&self, buffer: &mut Vec<u8>) {
    ///         self.0.write_to(buffer);
    ///         buffer.extend_from_slice("°C".as_bytes());
    ///     }
    /// }
    /// ```
    pub trait WriteBuffer {
        /// Appends the value's representation to `buffer`.
        fn write_to(&self, buffer: &mut Vec<u8>);
    }

    macro_rules! impl_write_buffer {
        (str => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &str = self.as_ref();
                    buffer.extend_from_slice(value.as_bytes());
                }
            })*
        };
        (bytes => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let value: &[u8] = self.as_ref();
                    buffer.extend_from_slice(value);
                }
            })*
        };
        (display => $($t:ty),*) => {
            $(impl WriteBuffer for $t {
                #[inline] fn write_to(&self, buffer: &mut Vec<u8>) {
                    let _ = std::io::Write::write_fmt(buffer, format_args!("{}", self));
                }
            })*
        };
    }

    impl<T: WriteBuffer + ?Sized> WriteBuffer for &T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }
    impl<T: WriteBuffer + ?Sized> WriteBuffer for &mut T {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            T::write_to(*self, buffer);
        }
    }

    impl_write_buffer! {
        str => str, String, Box<str>, Cow<'_, str>, Arc<str>, Rc<str>
    }
    impl_write_buffer! {
        bytes => [u8], Vec<u8>, Box<[u8]>, Cow<'_, [u8]>, Arc<[u8]>, Rc<[u8]>
    }
    impl_write_buffer! {
        display => u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, char
    }

    impl<const N: usize> WriteBuffer for [u8; N] {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(self);
        }
    }

    impl WriteBuffer for bool {
        #[inline]
        fn write_to(&self, buffer: &mut Vec<u8>) {
            buffer.extend_from_slice(match self {
                true => b"true",
                false => b"false",
            });
        }
    }
}

#[cfg(test)]
mod close_tests {
    use super::*;

    #[test]
    fn connection_header() {
        let cases = [
            (Version::Http11, true, false, ""),
            (Version::Http11, true, true, "connection: close\r\n"),
            (Version::Http11, false, false, "connection: close\r\n"),
            (Version::Http10, true, false, "connection: keep-alive\r\n"),
            (Version::Http10, true, true, "connection: close\r\n"),
            (Version::Http10, false, false, "connection: close\r\n"),
        ];

        for (version, keep_alive, close, header) in cases {
            let mut resp = Response::new();
            if close {
                resp.close();
            }

            let out = resp.finalize(version, keep_alive, &[], false);
            assert_eq!(out.keep_alive, keep_alive && !close);
            assert_eq!(
                String::from_utf8(out.bytes).unwrap(),
                format!("{} 200 OK\r\n{header}content-length: 0\r\n\r\n", version.as_str())
            );
        }
    }

    #[test]
    #[should_panic(expected = "Response is already finalized")]
    fn after_finalize() {
        let mut resp = Response::new();
        resp.finalize(Version::Http11, true, &[], false);
        resp.close();
    }

    #[test]
    #[should_panic(expected = "A response is finalized exactly once")]
    fn double_finalize() {
        let mut resp = Response::new();
        resp.finalize(Version::Http11, true, &[], false);
        resp.finalize(Version::Http11, true, &[], false);
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;

    fn wire(resp: &mut Response, extra: &[(String, String)]) -> String {
        String::from_utf8(resp.finalize(Version::Http11, true, extra, false).bytes).unwrap()
    }

    #[test]
    fn order_and_values() {
        let mut resp = Response::new();
        resp.header("X-A", "1")
            .header("x-b", 2u8)
            .header("X-A", true)
            .header("X-C", -7);

        assert_eq!(
            wire(&mut resp, &[]),
            "HTTP/1.1 200 OK\r\nX-A: 1\r\nx-b: 2\r\nX-A: true\r\nX-C: -7\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[test]
    fn set_header_replaces() {
        let mut resp = Response::new();
        resp.header("Content-Type", "text/plain")
            .set_header("content-type", "application/json");

        assert_eq!(resp.headers().len(), 1);
        assert_eq!(resp.headers().get("Content-Type"), Some("application/json"));
    }

    #[test]
    fn managed_headers_are_ignored() {
        let mut resp = Response::new();
        resp.header("Content-Length", 999).header("Connection", "upgrade").body("hi");

        assert_eq!(
            wire(&mut resp, &[]),
            "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi"
        );
    }

    #[test]
    fn extra_headers() {
        let extra = [
            ("X-Frame-Options".to_string(), "DENY".to_string()),
            ("Server".to_string(), "embed_web".to_string()),
        ];

        let mut resp = Response::new();
        resp.header("server", "custom");

        assert_eq!(
            wire(&mut resp, &extra),
            "HTTP/1.1 200 OK\r\nserver: custom\r\nX-Frame-Options: DENY\r\ncontent-length: 0\r\n\r\n"
        );
    }

    #[test]
    #[should_panic(expected = "Header values must not contain CR or LF")]
    fn header_injection() {
        Response::new().header("X-Bad", "a\r\nSet-Cookie: x=1");
    }
}

#[cfg(test)]
mod body_tests {
    use super::*;

    #[test]
    fn writers() {
        let mut resp = Response::new();
        resp.body("replaced").body([b'a', b'b']).append(1234u32).append('!');
        assert_eq!(resp.body_bytes(), b"ab1234!");

        resp.body_with(|w| {
            w.write("x=");
            write!(w, "{:02}", 5).unwrap();
        });
        assert_eq!(resp.body_bytes(), b"x=05");
    }

    #[test]
    fn head_only_keeps_length() {
        let mut resp = Response::new();
        resp.status(StatusCode::NotFound).body("missing");

        let out = resp.finalize(Version::Http10, false, &[], true);
        assert_eq!(
            String::from_utf8(out.bytes).unwrap(),
            "HTTP/1.0 404 Not Found\r\nconnection: close\r\ncontent-length: 7\r\n\r\n"
        );
    }
}
