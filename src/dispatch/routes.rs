use crate::{Controller, Method, Request, Response};

type RouteFn = Box<dyn Fn(&Request, &mut Response) + Send + Sync>;

struct Route {
    method: Method,
    path: String,
    public: bool,
    handler: RouteFn,
}

/// A ready-made [`Controller`] mapping exact `(method, prefix + path)` pairs
/// to closures.
///
/// ```
/// use embed_web::{Method, RouteController, StatusCode};
///
/// let api = RouteController::with_prefix("/api")
///     .route(Method::Get, "/users", |_, resp| {
///         resp.body(r#"["alice","bob"]"#);
///     })
///     .public_route(Method::Get, "/version", |_, resp| {
///         resp.body(env!("CARGO_PKG_VERSION"));
///     })
///     .route(Method::Delete, "/users", |_, resp| {
///         resp.status(StatusCode::NoContent);
///     });
///
/// assert_eq!(api.len(), 3);
/// ```
#[derive(Default)]
pub struct RouteController {
    prefix: String,
    routes: Vec<Route>,
}

impl RouteController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every route path is appended to `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        RouteController {
            prefix: prefix.trim_end_matches('/').to_string(),
            routes: Vec::new(),
        }
    }

    /// Adds a route that requires basic auth when it is configured.
    pub fn route<F>(self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(method, path, false, Box::new(handler))
    }

    /// Adds a route that skips basic auth.
    pub fn public_route<F>(self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&Request, &mut Response) + Send + Sync + 'static,
    {
        self.add(method, path, true, Box::new(handler))
    }

    fn add(mut self, method: Method, path: &str, public: bool, handler: RouteFn) -> Self {
        let path = format!("{}{}", self.prefix, path);
        self.routes.push(Route {
            method,
            path,
            public,
            handler,
        });
        self
    }

    fn find(&self, method: Method, path: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.method == method && route.path == path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Controller for RouteController {
    fn handles(&self, method: Method, path: &str) -> bool {
        self.find(method, path).is_some()
    }

    fn process(&self, request: &Request, response: &mut Response) {
        if let Some(route) = self.find(request.method(), request.path()) {
            (route.handler)(request, response);
        }
    }

    fn is_public(&self, request: &Request) -> bool {
        self.find(request.method(), request.path())
            .is_some_and(|route| route.public)
    }
}

impl std::fmt::Debug for RouteController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for route in &self.routes {
            list.entry(&format_args!("{} {}", route.method, route.path));
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StatusCode;

    fn routes() -> RouteController {
        RouteController::with_prefix("/api/")
            .route(Method::Get, "/items", |req, resp| {
                resp.body(format!("items {}", req.query()));
            })
            .route(Method::Post, "/items", |_, resp| {
                resp.status(StatusCode::Created);
            })
            .public_route(Method::Get, "/ping", |_, resp| {
                resp.body("pong");
            })
    }

    #[test]
    fn exact_matching() {
        let routes = routes();

        let cases = [
            (Method::Get, "/api/items", true),
            (Method::Post, "/api/items", true),
            (Method::Put, "/api/items", false),
            (Method::Get, "/api/items/", false),
            (Method::Get, "/items", false),
            (Method::Get, "/api/ping", true),
        ];

        for (method, path, expected) in cases {
            assert_eq!(routes.handles(method, path), expected, "{method} {path}");
        }
    }

    #[test]
    fn process_and_public_flag() {
        let routes = routes();

        let request = Request::new(Method::Get, "/api/items?page=2").unwrap();
        let mut resp = Response::new();
        routes.process(&request, &mut resp);
        assert_eq!(resp.body_bytes(), b"items page=2");
        assert!(!routes.is_public(&request));

        let request = Request::new(Method::Get, "/api/ping").unwrap();
        assert!(routes.is_public(&request));

        let request = Request::new(Method::Post, "/api/items").unwrap();
        let mut resp = Response::new();
        routes.process(&request, &mut resp);
        assert_eq!(resp.status_code(), StatusCode::Created);
    }
}
