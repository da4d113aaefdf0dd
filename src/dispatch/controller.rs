use crate::{Method, Request, Response};
use std::sync::Arc;

/// A route handler registered with the [`Server`](crate::Server).
///
/// The server asks every registered controller, in registration order,
/// whether it [`handles`](Controller::handles) the request. The first one
/// that does [`process`](Controller::process)es it and no other controller is
/// consulted. There is no specificity ranking: registration order is the only
/// precedence rule.
///
/// # Examples
/// ```
/// use embed_web::{Controller, Method, Request, Response, StatusCode};
///
/// struct Health;
///
/// impl Controller for Health {
///     fn handles(&self, method: Method, path: &str) -> bool {
///         method == Method::Get && path == "/health"
///     }
///
///     fn process(&self, _: &Request, resp: &mut Response) {
///         resp.status(StatusCode::Ok).body("ok");
///     }
///
///     // Load balancers probe without credentials
///     fn is_public(&self, _: &Request) -> bool {
///         true
///     }
/// }
/// ```
pub trait Controller: Send + Sync {
    /// Whether this controller serves `method` on the decoded `path`.
    ///
    /// Must not depend on access policy: it answers
    /// [`Server::handles`](crate::Server::handles) as well.
    fn handles(&self, method: Method, path: &str) -> bool;

    /// Builds the response. Only called after `handles` returned `true`.
    fn process(&self, request: &Request, response: &mut Response);

    /// Whether `request` may skip basic authentication (default: `false`).
    ///
    /// Only asked of the controller that handles the request.
    fn is_public(&self, _request: &Request) -> bool {
        false
    }
}

/// Outcome of [`Controllers::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Handled,
    Unhandled,
}

/// Controllers in registration order.
#[derive(Default, Clone)]
pub struct Controllers {
    list: Vec<Arc<dyn Controller>>,
}

impl Controllers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a controller. Registering the same one twice is allowed; the
    /// second entry never wins.
    pub fn register(&mut self, controller: Arc<dyn Controller>) {
        self.list.push(controller);
    }

    /// Removes the first entry that is `controller` (by identity).
    ///
    /// Returns whether anything was removed.
    pub fn deregister(&mut self, controller: &Arc<dyn Controller>) -> bool {
        let target = data_ptr(controller);
        match self.list.iter().position(|c| data_ptr(c) == target) {
            Some(index) => {
                self.list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether any controller handles `(method, path)`.
    pub fn handles(&self, method: Method, path: &str) -> bool {
        self.find(method, path).is_some()
    }

    /// The first controller that handles `(method, path)`.
    pub fn find(&self, method: Method, path: &str) -> Option<&Arc<dyn Controller>> {
        self.list.iter().find(|c| c.handles(method, path))
    }

    /// Lets the first matching controller process the request.
    pub fn dispatch(&self, request: &Request, response: &mut Response) -> Routed {
        match self.find(request.method(), request.path()) {
            Some(controller) => {
                controller.process(request, response);
                Routed::Handled
            }
            None => Routed::Unhandled,
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl std::fmt::Debug for Controllers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controllers")
            .field("len", &self.list.len())
            .finish()
    }
}

// Compares the data half of the fat pointer only; vtables may differ
// between codegen units for the same type.
#[inline(always)]
fn data_ptr(controller: &Arc<dyn Controller>) -> *const u8 {
    Arc::as_ptr(controller) as *const u8
}
