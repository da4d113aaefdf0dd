//! Error types: request-level failures rendered as JSON responses, and the
//! errors that can keep the server from starting or loading its configuration.

use crate::{access::acl::AclError, Response, StatusCode, Version};
use std::{io, net::SocketAddr, path::PathBuf};
use thiserror::Error;

/// A request-level failure.
///
/// Every kind maps to a status code and a stable machine-readable code, and is
/// sent to the client as `{"error":"...","code":"..."}`. None of them stops
/// the event loop.
#[derive(Debug, Error, PartialEq)]
pub enum ErrorKind {
    #[error("invalid HTTP method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidUrl,

    #[error("invalid HTTP version")]
    InvalidVersion,
    #[error("HTTP version not supported")]
    UnsupportedVersion,

    #[error("invalid header")]
    InvalidHeader,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("request head too large")]
    HeadTooLarge,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("transfer encodings are not supported")]
    UnsupportedTransferEncoding,

    #[error("request body too large")]
    BodyTooLarge,

    #[error("authentication required")]
    Unauthorized,
    #[error("access denied")]
    Forbidden,
    #[error("resource not found")]
    NotFound,

    #[error("service temporarily unavailable")]
    ServiceUnavailable,
    #[error("I/O error: {0:?}")]
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status:ident => $message:literal, $code:literal; )*) => {
        /// Status code sent for this error.
        pub const fn status(&self) -> StatusCode {
            match self { $(
                Self::$name { .. } => StatusCode::$status,
            )* }
        }

        /// Stable machine-readable code, e.g. `BODY_TOO_LARGE`.
        pub const fn code(&self) -> &'static str {
            match self { $(
                Self::$name { .. } => $code,
            )* }
        }

        /// JSON document sent as the response body.
        pub const fn json(&self) -> &'static str {
            match self { $(
                Self::$name { .. } => concat!(
                    r#"{"error":""#, $message, r#"","code":""#, $code, r#""}"#
                ),
            )* }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: BadRequest => "Invalid HTTP method", "INVALID_METHOD";
        InvalidUrl: BadRequest => "Invalid URL format", "INVALID_URL";

        InvalidVersion: BadRequest => "Invalid HTTP version", "INVALID_VERSION";
        UnsupportedVersion: HttpVersionNotSupported
            => "HTTP version not supported", "UNSUPPORTED_VERSION";

        InvalidHeader: BadRequest => "Invalid header format", "INVALID_HEADER";
        TooManyHeaders: RequestHeaderFieldsTooLarge => "Too many headers", "TOO_MANY_HEADERS";
        HeadTooLarge: RequestHeaderFieldsTooLarge
            => "Request head too large", "HEAD_TOO_LARGE";
        InvalidContentLength: BadRequest
            => "Invalid Content-Length", "INVALID_CONTENT_LENGTH";
        UnsupportedTransferEncoding: NotImplemented
            => "Transfer-Encoding not supported", "UNSUPPORTED_TRANSFER_ENCODING";

        BodyTooLarge: PayloadTooLarge => "Request body too large", "BODY_TOO_LARGE";

        Unauthorized: Unauthorized => "Authentication required", "UNAUTHORIZED";
        Forbidden: Forbidden => "Access denied", "FORBIDDEN";
        NotFound: NotFound => "Resource not found", "NOT_FOUND";

        ServiceUnavailable: ServiceUnavailable
            => "Service temporarily unavailable", "SERVICE_UNAVAILABLE";
        Io: InternalServerError => "I/O error occurred", "IO_ERROR";
    }

    /// Replaces the status and body of `response` with this error.
    ///
    /// Headers already set on the response (e.g. `WWW-Authenticate`) are kept.
    pub fn render(&self, response: &mut Response) {
        response
            .status(self.status())
            .set_header("Content-Type", "application/json")
            .body(self.json());
    }

    /// A complete `Connection: close` response, written straight to a socket
    /// that never reaches the request pipeline.
    pub(crate) fn to_wire(&self, version: Version) -> Vec<u8> {
        let body = self.json();
        format!(
            "{} {}\r\nconnection: close\r\ncontent-length: {}\r\ncontent-type: application/json\r\n\r\n{}",
            version.as_str(),
            self.status(),
            body.len(),
            body
        )
        .into_bytes()
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub struct IoError(pub io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

/// Reasons [`Server::try_start`](crate::Server::try_start) can fail.
///
/// The server stays stopped in every case.
#[derive(Debug, Error)]
pub enum StartError {
    /// The bind address did not resolve to any socket address.
    #[error("cannot resolve bind address `{0}`")]
    Resolve(String),

    /// The listening socket could not be created or bound.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Certificate, key or CA material is missing or invalid.
    #[error("invalid TLS material: {0}")]
    Tls(String),

    #[error(transparent)]
    Acl(#[from] AclError),

    #[error("invalid hidden file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("cannot build the event loop: {0}")]
    Runtime(#[source] io::Error),
}

/// Failures while loading a [`ServerConfig`](crate::ServerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid header line {0:?}, expected `Name: value`")]
    HeaderLine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bodies() {
        let cases = [
            (
                ErrorKind::InvalidMethod,
                400,
                r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#,
            ),
            (
                ErrorKind::BodyTooLarge,
                413,
                r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#,
            ),
            (
                ErrorKind::Unauthorized,
                401,
                r#"{"error":"Authentication required","code":"UNAUTHORIZED"}"#,
            ),
            (
                ErrorKind::UnsupportedTransferEncoding,
                501,
                r#"{"error":"Transfer-Encoding not supported","code":"UNSUPPORTED_TRANSFER_ENCODING"}"#,
            ),
        ];

        for (kind, status, json) in cases {
            assert_eq!(kind.status().as_u16(), status);
            assert_eq!(kind.json(), json);
        }
    }

    #[test]
    fn wire_format() {
        let bytes = ErrorKind::ServiceUnavailable.to_wire(Version::Http11);
        let text = String::from_utf8(bytes).unwrap();
        let json = ErrorKind::ServiceUnavailable.json();

        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("connection: close\r\n"));
        assert!(text.contains(&format!("content-length: {}\r\n", json.len())));
        assert!(text.ends_with(json));
    }

    #[test]
    fn io_errors_compare_by_kind() {
        let a = ErrorKind::from(io::Error::new(io::ErrorKind::NotFound, "a"));
        let b = ErrorKind::from(io::Error::new(io::ErrorKind::NotFound, "b"));
        assert_eq!(a, b);
        assert_eq!(a.status(), StatusCode::InternalServerError);
    }
}
