//! Shared state for the HTTP transport.

use svgd_metrics::AccessPolicy;

use crate::handler::QueryHandler;

/// State shared by every request.
#[derive(Debug, Clone)]
pub struct AppState {
    handler: QueryHandler,
    access: AccessPolicy,
}

impl AppState {
    /// Creates state enforcing the registry's access policy.
    #[must_use]
    pub fn new(handler: QueryHandler) -> Self {
        let access = handler.registry().settings().access.clone();
        Self { handler, access }
    }

    /// Replace the access policy.
    #[must_use]
    pub fn with_access(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    /// Returns the query handler.
    #[must_use]
    pub const fn handler(&self) -> &QueryHandler {
        &self.handler
    }

    /// Returns the access policy.
    #[must_use]
    pub const fn access(&self) -> &AccessPolicy {
        &self.access
    }
}
