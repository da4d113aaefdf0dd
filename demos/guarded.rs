//! Basic auth, an IP access list and a request filter in front of a small API.
//!
//! ```text
//! curl -u admin:secret http://127.0.0.1:8080/api/time
//! curl http://127.0.0.1:8080/api/health
//! ```

use embed_web::{Method, RouteController, Server, StatusCode};
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "embed_web=debug".into()))
        .init();

    let mut server = Server::new();
    server
        .set_bind_address(":8080")
        .set_document_root("")
        .set_auth_domain("guarded demo")
        .set_basic_auth_username("admin")
        .set_basic_auth_password("secret")
        .set_ip_access_control_list("+127.0.0.1, +::1, +192.168.0.0/16")
        .set_extra_headers(vec![("X-Content-Type-Options".into(), "nosniff".into())]);

    server.register_controller(Arc::new(
        RouteController::with_prefix("/api")
            .public_route(Method::Get, "/health", |_, resp| {
                resp.body("ok");
            })
            .route(Method::Get, "/time", |_, resp| {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs();
                resp.header("Content-Type", "application/json")
                    .body(format!(r#"{{"unix": {now}}}"#));
            }),
    ));

    // Clients asking for XML are told no
    server.register_filter(|req, resp| {
        if req.header("Accept").is_some_and(|accept| accept.contains("xml")) {
            resp.status(StatusCode::UnsupportedMediaType).body("json only");
            return false;
        }
        true
    });

    if !server.start() {
        std::process::exit(1);
    }

    let mut last_report = Instant::now();
    loop {
        server.poll(Duration::from_millis(100));

        if last_report.elapsed() >= Duration::from_secs(60) {
            server.print_stats();
            last_report = Instant::now();
        }
    }
}
