use crate::{
    access::AccessPolicy,
    config::{self, ReqLimits, ServerConfig, TlsConfig},
    dispatch::pipeline::Pipeline,
    errors::{ConfigError, StartError},
    http::request::ParseLimits,
    server::{
        connection::Lifecycle,
        stats::Statistics,
        tls,
        transport::{Timeouts, Transport},
    },
    statics::{FileSystem, StaticFiles},
    Controller, Controllers, FilterSlot, Method, Request, Response,
};
use std::{
    fmt,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::runtime::{Builder, Runtime};

/// An embeddable HTTP server driven by the host application.
///
/// Nothing runs in the background: [`start`](Self::start) binds the socket,
/// and every call to [`poll`](Self::poll) accepts connections, reads
/// requests and writes responses for at most the given duration, all on the
/// calling thread.
///
/// Each request passes, in order, the IP access list (`403`), basic
/// authentication (`401`), the [filter](Self::register_filter), the
/// [controllers](Self::register_controller) and finally the static files.
/// Whatever is left gets `404`.
///
/// `Server` owns its own single-threaded tokio runtime, so it must not be
/// started, polled or dropped from inside another async runtime.
///
/// # Examples
///
/// ```no_run
/// use embed_web::{Method, RouteController, Server};
/// use std::{sync::Arc, time::Duration};
///
/// let mut server = Server::new();
/// server
///     .set_bind_address("127.0.0.1:8080")
///     .set_document_root("");
///
/// server.register_controller(Arc::new(
///     RouteController::new().route(Method::Get, "/health", |_, resp| {
///         resp.body("ok");
///     }),
/// ));
///
/// if !server.start() {
///     return;
/// }
/// loop {
///     server.poll(Duration::from_millis(100));
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    controllers: Controllers,
    filter: FilterSlot,
    static_override: Option<Arc<dyn StaticFiles>>,
    stats: Statistics,
    running: Option<Running>,
}

/// Everything that exists only between `start` and `stop`. Fields drop in
/// order, the runtime last.
struct Running {
    transport: Transport,
    lifecycle: Lifecycle,
    policy: AccessPolicy,
    statics: Option<Arc<dyn StaticFiles>>,
    runtime: Runtime,
}

impl Default for Server {
    fn default() -> Self {
        Self::with_config(ServerConfig::default())
    }
}

impl Server {
    /// A stopped server with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stopped server with `config`.
    ///
    /// ```
    /// use embed_web::{Server, ServerConfig};
    ///
    /// let config = ServerConfig::from_toml_str(r#"
    ///     bind_address = "127.0.0.1:0"
    ///     document_root = ""
    /// "#).unwrap();
    ///
    /// let server = Server::with_config(config);
    /// assert!(!server.is_running());
    /// ```
    pub fn with_config(config: ServerConfig) -> Self {
        Server {
            config,
            controllers: Controllers::new(),
            filter: FilterSlot::default(),
            static_override: None,
            stats: Statistics::default(),
            running: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

// Lifecycle
impl Server {
    /// Starts listening. Returns `false` and logs the reason if the server
    /// could not start; see [`try_start`](Self::try_start).
    pub fn start(&mut self) -> bool {
        match self.try_start() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(bind_address = %self.config.bind_address, %err, "server failed to start");
                false
            }
        }
    }

    /// Starts listening with a snapshot of the current configuration.
    ///
    /// Resets the [statistics](Self::stats). Starting a running server does
    /// nothing. On error the server stays stopped.
    pub fn try_start(&mut self) -> Result<(), StartError> {
        if self.running.is_some() {
            return Ok(());
        }

        let addr = self.config.resolve_bind_address()?;
        let policy = AccessPolicy::from_config(&self.config)?;
        let statics = match &self.static_override {
            Some(statics) => Some(statics.clone()),
            None => FileSystem::from_config(&self.config, &policy.hidden)
                .map(|files| Arc::new(files) as Arc<dyn StaticFiles>),
        };
        let tls = self.config.tls.as_ref().map(tls::acceptor).transpose()?;

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(StartError::Runtime)?;
        let transport = Transport::bind(
            addr,
            &runtime,
            tls,
            Timeouts::new(&self.config.request_limits),
            self.config.allow_multiple_clients,
        )?;
        let lifecycle = Lifecycle::new(
            ParseLimits::new(&self.config),
            self.config.extra_headers.clone(),
        );

        self.stats.restart();
        tracing::info!(
            addr = %transport.local_addr(),
            tls = self.config.tls.is_some(),
            auth = policy.auth.is_some(),
            "server started"
        );

        self.running = Some(Running {
            transport,
            lifecycle,
            policy,
            statics,
            runtime,
        });
        Ok(())
    }

    /// Handles network traffic for at most `timeout`, then returns.
    ///
    /// Every event that arrives in that window runs through the request
    /// pipeline before `poll` returns. Does nothing while stopped.
    pub fn poll(&mut self, timeout: Duration) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let Running {
            transport,
            lifecycle,
            policy,
            statics,
            runtime,
        } = running;

        let deadline = tokio::time::Instant::now() + timeout;
        let filter = &self.filter;
        let controllers = &self.controllers;
        let stats = &mut self.stats;

        runtime.block_on(async {
            while let Ok(Some(event)) = tokio::time::timeout_at(deadline, transport.next()).await {
                let mut pipeline = Pipeline {
                    policy: &*policy,
                    filter,
                    controllers,
                    statics: statics.as_deref(),
                    stats: &mut *stats,
                };

                if let Some(outgoing) = lifecycle.handle(event, &mut pipeline) {
                    transport.send(outgoing);
                }
            }
        });
    }

    /// Drops every connection without flushing and releases the socket.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let addr = running.transport.local_addr();
            let open = running.lifecycle.len();
            drop(running);
            tracing::info!(%addr, open, "server stopped");
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address actually bound, useful with port `0`. `None` while stopped.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .as_ref()
            .map(|running| running.transport.local_addr())
    }

    /// Connections currently open.
    pub fn connection_count(&self) -> usize {
        self.running
            .as_ref()
            .map_or(0, |running| running.transport.connection_count())
    }

    #[inline]
    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Writes the request counter and uptime to stdout.
    pub fn print_stats(&self) {
        println!("{}", self.stats);
    }
}

// Request handling
impl Server {
    /// Whether some registered controller accepts `method` on `path`.
    /// Access rules are not consulted.
    pub fn handles(&self, method: Method, path: &str) -> bool {
        self.controllers.handles(method, path)
    }

    /// [`handles`](Self::handles) for a method token as it appears on the
    /// request line. Unknown tokens are never handled.
    pub fn handles_str(&self, method: &str, path: &str) -> bool {
        method
            .parse::<Method>()
            .is_ok_and(|method| self.controllers.handles(method, path))
    }

    /// Appends `controller`; earlier registrations take precedence.
    /// Takes effect immediately, also while running.
    pub fn register_controller(&mut self, controller: Arc<dyn Controller>) -> &mut Self {
        self.controllers.register(controller);
        self
    }

    /// Removes the first registration of this very `controller`.
    /// Returns `false` if it was not registered.
    pub fn deregister_controller(&mut self, controller: &Arc<dyn Controller>) -> bool {
        self.controllers.deregister(controller)
    }

    /// Installs the request filter, replacing any previous one.
    ///
    /// The filter runs after the access checks and before the controllers.
    /// Returning `false` sends the response as the filter left it.
    ///
    /// ```
    /// use embed_web::{Server, StatusCode};
    ///
    /// let mut server = Server::new();
    /// server.register_filter(|req, resp| {
    ///     if req.header("X-Api-Key") == Some("let-me-in") {
    ///         return true;
    ///     }
    ///     resp.status(StatusCode::Forbidden).body("missing key");
    ///     false
    /// });
    /// ```
    pub fn register_filter<F>(&mut self, filter: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.filter.set(filter);
        self
    }

    pub fn clear_filter(&mut self) -> &mut Self {
        self.filter.clear();
        self
    }

    /// Replaces the document-root file server, e.g. with assets compiled
    /// into the binary. Applies from the next start.
    pub fn set_static_files(&mut self, statics: Arc<dyn StaticFiles>) -> &mut Self {
        self.static_override = Some(statics);
        self
    }
}

macro_rules! config_accessors {
    ($( $(#[$doc:meta])* $kind:ident $field:ident, $setter:ident: $get:ty, $set:ty; )*) => { $(
        $(#[$doc])*
        #[inline]
        pub fn $field(&self) -> $get {
            config_accessors!(@get $kind self.config.$field)
        }

        #[doc = concat!("Sets [`", stringify!($field), "`](Self::", stringify!($field), ").")]
        pub fn $setter(&mut self, value: $set) -> &mut Self {
            self.config.$field = value.into();
            self
        }
    )* };
    (@get by_ref $value:expr) => { &$value };
    (@get copy $value:expr) => { $value };
}

/// Configuration. Changes apply from the next [`start`](Self::start),
/// see [`ServerConfig`] for what each option means.
impl Server {
    config_accessors! {
        /// `[host]:port` to listen on.
        by_ref bind_address, set_bind_address: &str, impl Into<String>;
        /// Directory for static files; empty disables them.
        by_ref document_root, set_document_root: &Path, impl Into<PathBuf>;
        by_ref index_files, set_index_files: &[String], Vec<String>;
        copy directory_listing, set_directory_listing: bool, bool;
        /// Realm named in basic auth challenges.
        by_ref auth_domain, set_auth_domain: &str, impl Into<String>;
        by_ref basic_auth_username, set_basic_auth_username: &str, impl Into<String>;
        by_ref basic_auth_password, set_basic_auth_password: &str, impl Into<String>;
        by_ref ip_access_control_list, set_ip_access_control_list: &str, impl Into<String>;
        by_ref hidden_file_pattern, set_hidden_file_pattern: &str, impl Into<String>;
        /// Headers added to every response that does not set them itself.
        by_ref extra_headers, set_extra_headers: &[(String, String)], Vec<(String, String)>;
        /// Largest accepted request body, in bytes.
        copy upload_size_limit, set_upload_size_limit: usize, usize;
        by_ref tmp_dir, set_tmp_dir: &Path, impl Into<PathBuf>;
        copy allow_multiple_clients, set_allow_multiple_clients: bool, bool;
        /// Parser limits and socket timeouts.
        by_ref request_limits, set_request_limits: &ReqLimits, ReqLimits;
    }

    /// Sets [`extra_headers`](Self::extra_headers) from `Name: value` lines.
    /// Leaves them unchanged when a line is malformed.
    ///
    /// ```
    /// use embed_web::Server;
    ///
    /// let mut server = Server::new();
    /// server.set_extra_headers_text("X-Frame-Options: DENY\r\n").unwrap();
    /// assert_eq!(server.extra_headers()[0].1, "DENY");
    /// ```
    pub fn set_extra_headers_text(&mut self, raw: &str) -> Result<&mut Self, ConfigError> {
        self.config.extra_headers = config::parse_header_lines(raw)?;
        Ok(self)
    }

    /// Basic auth is enforced iff both user and password are set.
    pub fn requires_basic_authentication(&self) -> bool {
        self.config.requires_basic_authentication()
    }

    /// Serves HTTPS with the PEM `certificate` chain and `private_key`.
    /// With a `ca_bundle`, clients must present a certificate it signed.
    pub fn enable_tls(
        &mut self,
        certificate: impl Into<PathBuf>,
        private_key: impl Into<PathBuf>,
        ca_bundle: Option<PathBuf>,
    ) -> &mut Self {
        self.config.tls = Some(TlsConfig {
            certificate: certificate.into(),
            private_key: private_key.into(),
            ca_bundle,
        });
        self
    }

    pub fn disable_tls(&mut self) -> &mut Self {
        self.config.tls = None;
        self
    }

    #[inline]
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.config.tls.as_ref()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("controllers", &self.controllers)
            .field("filter", &self.filter)
            .field("running", &self.is_running())
            .field("local_addr", &self.local_addr())
            .field("stats", &self.stats)
            .finish()
    }
}
