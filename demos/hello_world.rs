use embed_web::{Controller, Method, Request, Response, Server, StatusCode};
use std::{sync::Arc, time::Duration};
use tracing_subscriber::EnvFilter;

struct HelloWorld;

impl Controller for HelloWorld {
    fn handles(&self, method: Method, path: &str) -> bool {
        method == Method::Get && path == "/"
    }

    fn process(&self, _: &Request, resp: &mut Response) {
        resp.status(StatusCode::Ok)
            .header("Content-Type", "text/plain")
            .body("Hello, world!");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut server = Server::new();
    server
        .set_bind_address("127.0.0.1:8080")
        .set_document_root("");
    server.register_controller(Arc::new(HelloWorld));

    if !server.start() {
        std::process::exit(1);
    }
    loop {
        server.poll(Duration::from_millis(100));
    }
}
