use crate::{
    access::AccessPolicy,
    errors::ErrorKind,
    server::{connection::Dispatch, stats::Statistics},
    statics::{make_safe_path, StaticFiles},
    Controllers, FilterSlot, Method, Request, Response, Routed,
};

/// Where a request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Denied,
    Unauthorized,
    Filtered,
    Controller,
    Static,
    NotFound,
}

/// The gate sequence every complete request runs through:
/// ACL, basic auth, filter, controllers, static files, not found.
pub(crate) struct Pipeline<'a> {
    pub(crate) policy: &'a AccessPolicy,
    pub(crate) filter: &'a FilterSlot,
    pub(crate) controllers: &'a Controllers,
    pub(crate) statics: Option<&'a dyn StaticFiles>,
    pub(crate) stats: &'a mut Statistics,
}

impl Pipeline<'_> {
    pub(crate) fn run(&mut self, request: &Request, response: &mut Response) -> Stage {
        self.stats.record_request();

        if !self.policy.acl.allows(request.client_addr().ip()) {
            ErrorKind::Forbidden.render(response);
            return Stage::Denied;
        }

        if let Some(auth) = &self.policy.auth {
            let public = self
                .controllers
                .find(request.method(), request.path())
                .is_some_and(|controller| controller.is_public(request));

            if !public && !auth.verify(request) {
                auth.challenge(response);
                return Stage::Unauthorized;
            }
        }

        if !self.filter.allows(request, response) {
            return Stage::Filtered;
        }

        if self.controllers.dispatch(request, response) == Routed::Handled {
            return Stage::Controller;
        }

        if self.serve_static(request, response) {
            return Stage::Static;
        }

        ErrorKind::NotFound.render(response);
        Stage::NotFound
    }

    fn serve_static(&self, request: &Request, response: &mut Response) -> bool {
        let Some(statics) = self.statics else {
            return false;
        };
        if !matches!(request.method(), Method::Get | Method::Head) {
            return false;
        }

        let Some(path) = make_safe_path(request.path()) else {
            return false;
        };
        if self.policy.hidden.is_hidden(&path) {
            return false;
        }

        statics.serve(&path, request, response)
    }
}

impl Dispatch for Pipeline<'_> {
    fn dispatch(&mut self, request: &Request, response: &mut Response) {
        let stage = self.run(request, response);
        tracing::debug!(
            method = %request.method(),
            path = request.path(),
            peer = %request.client_addr(),
            status = response.status_code().as_u16(),
            ?stage,
            "request dispatched"
        );
    }
}
