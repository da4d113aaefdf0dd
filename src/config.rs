//! Server configuration
//!
//! [`ServerConfig`] is a plain struct with public fields and sensible
//! defaults. It can be built in code, loaded from TOML, or edited through the
//! accessor pairs on [`Server`](crate::Server). A running server works on the
//! snapshot taken by [`Server::start`](crate::Server::start); edits take effect
//! on the next start.
//!
//! # Examples
//!
//! ```
//! use embed_web::ServerConfig;
//!
//! let config = ServerConfig {
//!     bind_address: "127.0.0.1:8081".into(),
//!     directory_listing: true,
//!     ..ServerConfig::default()
//! };
//! assert_eq!(config.document_root.to_str(), Some("www"));
//!
//! let config = ServerConfig::from_toml_str(r#"
//!     bind_address = ":9000"
//!     basic_auth_username = "admin"
//!     basic_auth_password = "secret"
//! "#).unwrap();
//! assert!(config.requires_basic_authentication());
//! ```

use crate::errors::{ConfigError, StartError};
use serde::{Deserialize, Deserializer};
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

/// Everything the server needs to know before [`start`](crate::Server::start).
///
/// Missing TOML keys fall back to [`ServerConfig::default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `[host]:port` to listen on (default: `":8080"`).
    ///
    /// `:8080` and `8080` listen on all interfaces. Host names are resolved
    /// at start and the first address wins.
    pub bind_address: String,

    /// Directory served when no controller handles a request (default: `"www"`).
    ///
    /// An empty path disables static serving, so unhandled requests get `404`.
    pub document_root: PathBuf,

    /// Files tried, in order, when a directory is requested
    /// (default: `["index.html", "index.htm"]`).
    pub index_files: Vec<String>,

    /// Render an HTML listing for directories without an index file (default: `false`).
    pub directory_listing: bool,

    /// Certificate material; `None` serves plain HTTP (default: `None`).
    pub tls: Option<TlsConfig>,

    /// Realm named in `WWW-Authenticate` challenges (default: `"localhost"`).
    pub auth_domain: String,

    /// Basic auth user (default: empty).
    ///
    /// Authentication is enforced only when both user and password are non-empty.
    pub basic_auth_username: String,

    /// Basic auth password (default: empty).
    pub basic_auth_password: String,

    /// Comma-separated `+`/`-` rules over IP addresses and CIDR blocks
    /// (default: empty, every peer allowed).
    ///
    /// See [`AccessList`](crate::AccessList) for the grammar.
    pub ip_access_control_list: String,

    /// `|`-separated globs of paths the static server pretends do not exist
    /// (default: empty).
    ///
    /// See [`HiddenPattern`](crate::HiddenPattern) for the grammar.
    pub hidden_file_pattern: String,

    /// Headers appended to every response (default: none).
    ///
    /// In TOML either a list of `[name, value]` pairs or a string of
    /// `Name: value` lines, see [`parse_header_lines`].
    #[serde(deserialize_with = "header_list")]
    pub extra_headers: Vec<(String, String)>,

    /// Largest accepted `Content-Length` in bytes (default: `8 MiB`).
    ///
    /// Larger requests are answered with `413` before any body byte is read.
    pub upload_size_limit: usize,

    /// Directory for request bodies spooled to disk (default: the OS temp dir).
    pub tmp_dir: PathBuf,

    /// Serve more than one client at a time (default: `true`).
    ///
    /// When `false`, a connection accepted while another one is open is
    /// answered with `503` and closed.
    pub allow_multiple_clients: bool,

    /// Parser limits.
    pub request_limits: ReqLimits,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: ":8080".into(),
            document_root: PathBuf::from("www"),
            index_files: vec!["index.html".into(), "index.htm".into()],
            directory_listing: false,
            tls: None,
            auth_domain: "localhost".into(),
            basic_auth_username: String::new(),
            basic_auth_password: String::new(),
            ip_access_control_list: String::new(),
            hidden_file_pattern: String::new(),
            extra_headers: Vec::new(),
            upload_size_limit: 8 * 1024 * 1024,
            tmp_dir: std::env::temp_dir(),
            allow_multiple_clients: true,
            request_limits: ReqLimits::default(),
            _priv: (),
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&src)
    }

    /// True when both basic auth credentials are set.
    pub fn requires_basic_authentication(&self) -> bool {
        !self.basic_auth_username.is_empty() && !self.basic_auth_password.is_empty()
    }

    /// Resolves [`bind_address`](Self::bind_address) to the address to listen on.
    pub fn resolve_bind_address(&self) -> Result<SocketAddr, StartError> {
        resolve_bind_address(&self.bind_address)
    }
}

pub(crate) fn resolve_bind_address(src: &str) -> Result<SocketAddr, StartError> {
    let src = src.trim();
    let port = src.strip_prefix(':').unwrap_or(src);

    if let Ok(port) = port.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    src.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| StartError::Resolve(src.to_string()))
}

/// Certificate material for HTTPS.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain, leaf first.
    pub certificate: PathBuf,
    /// PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub private_key: PathBuf,
    /// PEM bundle of client CAs. When set, clients must present a
    /// certificate signed by one of them.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
}

/// Request parsing limits and socket timeouts.
///
/// Heads over `head_size` or with more than `header_count` headers are
/// answered with `431`. Timeouts are given in seconds in TOML, fractions
/// allowed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReqLimits {
    /// Maximum size of the request line plus headers in bytes (default: `16 KiB`).
    pub head_size: usize,
    /// Maximum number of headers (default: `64`).
    pub header_count: usize,
    /// Bodies larger than this are written to a file in
    /// [`tmp_dir`](ServerConfig::tmp_dir) instead of memory (default: `64 KiB`).
    pub spool_threshold: usize,

    /// Longest wait for the next bytes from a client, including the TLS
    /// handshake (default: `5 seconds`).
    ///
    /// Idle keep-alive connections are dropped when it runs out.
    #[serde(deserialize_with = "seconds")]
    pub socket_read_timeout: Duration,

    /// Longest time writing one response may take (default: `3 seconds`).
    #[serde(deserialize_with = "seconds")]
    pub socket_write_timeout: Duration,

    #[doc(hidden)]
    #[serde(skip)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            head_size: 16 * 1024,
            header_count: 64,
            spool_threshold: 64 * 1024,
            socket_read_timeout: Duration::from_secs(5),
            socket_write_timeout: Duration::from_secs(3),
            _priv: (),
        }
    }
}

/// Splits `Name: value` lines, separated by `\r\n` or `\n`, into pairs.
/// Blank lines are skipped.
///
/// ```
/// use embed_web::config::parse_header_lines;
///
/// let headers = parse_header_lines("X-Frame-Options: DENY\r\nCache-Control: no-store\r\n").unwrap();
/// assert_eq!(headers[1], ("Cache-Control".to_string(), "no-store".to_string()));
/// assert!(parse_header_lines("no colon here").is_err());
/// ```
pub fn parse_header_lines(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, value) = line
                .split_once(':')
                .filter(|(name, _)| !name.trim().is_empty())
                .ok_or_else(|| ConfigError::HeaderLine(line.to_string()))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn header_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<(String, String)>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Headers {
        Lines(String),
        Pairs(Vec<(String, String)>),
    }

    match Headers::deserialize(deserializer)? {
        Headers::Lines(raw) => parse_header_lines(&raw).map_err(serde::de::Error::custom),
        Headers::Pairs(pairs) => Ok(pairs),
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_address, ":8080");
        assert_eq!(config.document_root, PathBuf::from("www"));
        assert_eq!(config.index_files, ["index.html", "index.htm"]);
        assert_eq!(config.auth_domain, "localhost");
        assert_eq!(config.upload_size_limit, 8 * 1024 * 1024);
        assert!(config.allow_multiple_clients);
        assert!(!config.directory_listing);
        assert!(!config.requires_basic_authentication());
        assert!(config.tls.is_none());
    }

    #[test]
    fn basic_auth_needs_both_credentials() {
        let cases = [
            ("", "", false),
            ("admin", "", false),
            ("", "secret", false),
            ("admin", "secret", true),
        ];

        for (user, pass, expected) in cases {
            let config = ServerConfig {
                basic_auth_username: user.into(),
                basic_auth_password: pass.into(),
                ..ServerConfig::default()
            };
            assert_eq!(config.requires_basic_authentication(), expected, "{user:?}/{pass:?}");
        }
    }

    #[test]
    fn bind_addresses() {
        let cases = [
            (":8080", Some("0.0.0.0:8080")),
            ("8080", Some("0.0.0.0:8080")),
            ("127.0.0.1:9000", Some("127.0.0.1:9000")),
            ("[::1]:9000", Some("[::1]:9000")),
            (":99999", None),
            ("not an address", None),
            ("", None),
        ];

        for (src, expected) in cases {
            let result = resolve_bind_address(src).ok().map(|addr| addr.to_string());
            assert_eq!(result.as_deref(), expected, "{src:?}");
        }
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            bind_address = "127.0.0.1:0"
            document_root = "/srv/site"
            index_files = ["home.html"]
            ip_access_control_list = "-0.0.0.0/0,+10.0.0.0/8"
            extra_headers = [["X-Frame-Options", "DENY"]]
            upload_size_limit = 1024

            [tls]
            certificate = "cert.pem"
            private_key = "key.pem"

            [request_limits]
            header_count = 8
            socket_read_timeout = 2
            socket_write_timeout = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:0");
        assert_eq!(config.document_root, PathBuf::from("/srv/site"));
        assert_eq!(config.index_files, ["home.html"]);
        assert_eq!(
            config.extra_headers,
            [("X-Frame-Options".to_string(), "DENY".to_string())]
        );
        assert_eq!(config.upload_size_limit, 1024);
        assert_eq!(config.request_limits.header_count, 8);
        assert_eq!(config.request_limits.head_size, 16 * 1024);
        assert_eq!(config.request_limits.socket_read_timeout, Duration::from_secs(2));
        assert_eq!(config.request_limits.socket_write_timeout, Duration::from_millis(500));
        assert_eq!(config.auth_domain, "localhost");

        let tls = config.tls.unwrap();
        assert_eq!(tls.certificate, PathBuf::from("cert.pem"));
        assert!(tls.ca_bundle.is_none());
    }

    #[test]
    fn toml_errors() {
        assert!(matches!(
            ServerConfig::from_toml_str("upload_size_limit = \"big\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("[request_limits]\nsocket_read_timeout = -1"),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            ServerConfig::from_file("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn extra_headers_as_text() {
        let config = ServerConfig::from_toml_str(
            r#"extra_headers = "X-Frame-Options: DENY\r\nX-Served-By:  embed_web \r\n""#,
        )
        .unwrap();
        assert_eq!(
            config.extra_headers,
            [
                ("X-Frame-Options".to_string(), "DENY".to_string()),
                ("X-Served-By".to_string(), "embed_web".to_string()),
            ]
        );

        assert!(matches!(
            ServerConfig::from_toml_str(r#"extra_headers = ": no name""#),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            parse_header_lines("X-Ok: 1\nbroken"),
            Err(ConfigError::HeaderLine(line)) if line == "broken"
        ));
        assert!(parse_header_lines("").unwrap().is_empty());
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "directory_listing = true").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.directory_listing);
    }
}
