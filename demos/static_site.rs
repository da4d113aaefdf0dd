//! Serves a directory, with a health endpoint on top.
//!
//! ```text
//! cargo run --example static_site -- ./public
//! ```

use embed_web::{Method, RouteController, Server, ServerConfig};
use std::{env, sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match env::var("EMBED_WEB_CONFIG") {
        Ok(path) => match ServerConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(2);
            }
        },
        Err(_) => ServerConfig::default(),
    };

    let mut server = Server::with_config(config);
    if let Some(root) = env::args().nth(1) {
        server.set_document_root(root);
    }
    server
        .set_directory_listing(true)
        .set_hidden_file_pattern("**/.*|**.bak");

    server.register_controller(Arc::new(
        RouteController::new().public_route(Method::Get, "/healthz", |_, resp| {
            resp.body("ok");
        }),
    ));

    if !server.start() {
        std::process::exit(1);
    }
    println!("serving {} on {:?}", server.document_root().display(), server.local_addr());

    loop {
        server.poll(Duration::from_millis(100));
    }
}
