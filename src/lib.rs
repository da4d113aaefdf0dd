//! embed_web - a small HTTP/HTTPS server to embed in an application
//!
//! The host application owns the [`Server`] and drives it: [`Server::start`]
//! binds the socket, and each [`Server::poll`] call does the network work
//! that is due, on the calling thread, for at most the given duration.
//! There are no background threads and handlers never need to be
//! thread-safe against each other.
//!
//! # Request pipeline
//!
//! Every complete request goes through, in order:
//!
//! 1. the IP [access list](AccessList): `403` for peers it denies,
//! 2. [basic authentication](BasicAuth), when a user and password are
//!    configured: `401` with a challenge, unless the matching controller is
//!    [public](Controller::is_public),
//! 3. the [filter](Server::register_filter), which may answer by itself,
//! 4. the [controllers](Controller), first registered match wins,
//! 5. [static files](StaticFiles) below the document root, for `GET` and
//!    `HEAD`, skipping paths matched by the [hidden pattern](HiddenPattern),
//! 6. `404`.
//!
//! Errors are answered with a JSON body such as
//! `{"error":"Resource not found","code":"NOT_FOUND"}`.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1** and **HTTP/1.0** with persistent connections and pipelining
//! - Request bodies framed by `Content-Length`, spooled to disk above a threshold
//! - **TLS** via rustls, optionally requiring client certificates
//!
//! # Examples
//!
//! ```no_run
//! use embed_web::{Method, RouteController, Server, StatusCode};
//! use std::{sync::Arc, time::Duration};
//!
//! let mut server = Server::new();
//! server
//!     .set_bind_address("127.0.0.1:8080")
//!     .set_document_root("./public")
//!     .set_basic_auth_username("admin")
//!     .set_basic_auth_password("secret")
//!     .set_ip_access_control_list("+127.0.0.1, -0.0.0.0/0");
//!
//! server.register_controller(Arc::new(
//!     RouteController::with_prefix("/api")
//!         .public_route(Method::Get, "/health", |_, resp| {
//!             resp.body("ok");
//!         })
//!         .route(Method::Post, "/echo", |req, resp| {
//!             resp.status(StatusCode::Ok).body(req.body());
//!         }),
//! ));
//!
//! assert!(server.start());
//! loop {
//!     server.poll(Duration::from_millis(50));
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod headers;
    pub mod query;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod dispatch {
    pub(crate) mod controller;
    pub(crate) mod filter;
    pub(crate) mod pipeline;
    pub(crate) mod routes;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
    pub(crate) mod stats;
    pub(crate) mod tls;
    pub(crate) mod transport;
}
pub mod access;
pub mod config;
pub mod errors;
pub mod statics;

pub use crate::{
    access::{
        acl::{AccessList, AclError},
        auth::BasicAuth,
        pattern::HiddenPattern,
    },
    config::{ReqLimits, ServerConfig, TlsConfig},
    dispatch::{
        controller::{Controller, Controllers, Routed},
        filter::{FilterFn, FilterSlot},
        routes::RouteController,
    },
    errors::{ConfigError, ErrorKind, StartError},
    http::{
        headers::Headers,
        query,
        request::Request,
        response::{
            write::{BodyWriter, WriteBuffer},
            Response,
        },
        types::{Method, StatusCode, Version},
    },
    server::{connection::ConnectionId, server_impl::Server, stats::Statistics},
    statics::{FileSystem, StaticFiles},
};
