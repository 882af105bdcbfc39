//! Process-wide application span.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Keeps the `app` span entered for the lifetime of the guard.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter an `app` span tagged with `store` and the build SHA.
    #[must_use]
    pub fn new(store: impl Into<String>) -> Self {
        let store = store.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("app", store = %store, build_sha = %build_sha()),
        ));
        Self {
            _guard: span.enter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_can_be_created_and_dropped() {
        let guard = GlobalContextGuard::new("memory");
        drop(guard);
    }
}
