use crate::{Request, Response};

/// Predicate run after the access gates and before controller dispatch.
///
/// Returning `false` sends the response as the filter left it and skips
/// the controllers.
pub type FilterFn = Box<dyn Fn(&Request, &mut Response) -> bool + Send + Sync>;

/// Holds at most one filter; a new registration replaces the previous one.
#[derive(Default)]
pub struct FilterSlot {
    filter: Option<FilterFn>,
}

impl FilterSlot {
    pub fn set<F>(&mut self, filter: F)
    where
        F: Fn(&Request, &mut Response) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
    }

    pub fn clear(&mut self) {
        self.filter = None;
    }

    pub fn is_set(&self) -> bool {
        self.filter.is_some()
    }

    /// Runs the filter; an empty slot lets every request through.
    pub fn allows(&self, request: &Request, response: &mut Response) -> bool {
        match &self.filter {
            Some(filter) => filter(request, response),
            None => true,
        }
    }
}

impl std::fmt::Debug for FilterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, StatusCode};

    #[test]
    fn last_registration_wins() {
        let mut slot = FilterSlot::default();
        let request = Request::new(Method::Get, "/").unwrap();
        let mut resp = Response::new();

        assert!(!slot.is_set());
        assert!(slot.allows(&request, &mut resp));

        slot.set(|_, resp| {
            resp.status(StatusCode::Forbidden);
            false
        });
        assert!(!slot.allows(&request, &mut resp));
        assert_eq!(resp.status_code(), StatusCode::Forbidden);

        slot.set(|req, _| req.path() == "/");
        assert!(slot.allows(&request, &mut resp));

        slot.clear();
        assert!(!slot.is_set());
        assert!(slot.allows(&request, &mut resp));
    }
}
