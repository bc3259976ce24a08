//! Module authorization gate — fail-closed subset check.
//!
//! The gate calls the external authorization collaborator exactly once per
//! request, then checks that every module the request references is
//! individually present in the returned set. There is no partial
//! authorization and no combined-scope grant for cross-module requests.
//! A collaborator error or timeout is a denial, never an allowance, and
//! results are never cached across requests.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::AuthorityError;
use crate::types::{Module, ReportRequest};

// ---------------------------------------------------------------------------
// ModuleAuthority — the external collaborator interface
// ---------------------------------------------------------------------------

/// The external authorization collaborator. One `list_modules` call per
/// request; this is the only operation in the pipeline that may block on
/// external I/O.
#[async_trait]
pub trait ModuleAuthority: Send + Sync {
    async fn list_modules(&self) -> Result<BTreeSet<Module>, AuthorityError>;
}

/// A fixed grant, used by the CLI and test harnesses.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthority {
    granted: BTreeSet<Module>,
}

impl StaticAuthority {
    pub fn new(granted: impl IntoIterator<Item = Module>) -> Self {
        Self {
            granted: granted.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ModuleAuthority for StaticAuthority {
    async fn list_modules(&self) -> Result<BTreeSet<Module>, AuthorityError> {
        Ok(self.granted.clone())
    }
}

/// Counts collaborator invocations around an inner authority. Used to
/// enforce the one-call-per-request contract in tests.
pub struct CountingAuthority<A> {
    inner: A,
    calls: AtomicUsize,
}

impl<A> CountingAuthority<A> {
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<A: ModuleAuthority> ModuleAuthority for CountingAuthority<A> {
    async fn list_modules(&self) -> Result<BTreeSet<Module>, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_modules().await
    }
}

// ---------------------------------------------------------------------------
// AuthorizationGate
// ---------------------------------------------------------------------------

/// Outcome of the per-request authorization check.
///
/// The `missing` detail on `Deny` exists for audit logging only — the
/// engine discards it before the refusal is rendered, so the fixed-form
/// refusal can never leak which modules exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    Allow { granted: BTreeSet<Module> },
    Deny { missing: BTreeSet<Module> },
}

/// Per-request authorization gate. Holds no state between requests.
pub struct AuthorizationGate<'a> {
    authority: &'a dyn ModuleAuthority,
    timeout: Duration,
}

impl<'a> AuthorizationGate<'a> {
    pub fn new(authority: &'a dyn ModuleAuthority, timeout: Duration) -> Self {
        Self { authority, timeout }
    }

    /// Resolve the caller's authorized module set and check the request's
    /// module set against it. Exactly one collaborator call happens here.
    pub async fn authorize(&self, request: &ReportRequest) -> AuthzDecision {
        let granted = match tokio::time::timeout(self.timeout, self.authority.list_modules()).await
        {
            Ok(Ok(granted)) => granted,
            Ok(Err(err)) => {
                warn!(request_id = %request.request_id, error = %err, "authorization collaborator failed; denying");
                return AuthzDecision::Deny {
                    missing: request.modules.clone(),
                };
            }
            Err(_) => {
                warn!(
                    request_id = %request.request_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "authorization collaborator timed out; denying"
                );
                return AuthzDecision::Deny {
                    missing: request.modules.clone(),
                };
            }
        };

        let missing: BTreeSet<Module> = request
            .modules
            .difference(&granted)
            .cloned()
            .collect();

        if missing.is_empty() {
            debug!(request_id = %request.request_id, modules = request.modules.len(), "all modules authorized");
            AuthzDecision::Allow { granted }
        } else {
            warn!(request_id = %request.request_id, missing = missing.len(), "unauthorized module(s) in request");
            AuthzDecision::Deny { missing }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityRef, ParamBindings};

    struct FailingAuthority;

    #[async_trait]
    impl ModuleAuthority for FailingAuthority {
        async fn list_modules(&self) -> Result<BTreeSet<Module>, AuthorityError> {
            Err(AuthorityError::Unreachable("connection refused".into()))
        }
    }

    struct SlowAuthority(Duration);

    #[async_trait]
    impl ModuleAuthority for SlowAuthority {
        async fn list_modules(&self) -> Result<BTreeSet<Module>, AuthorityError> {
            tokio::time::sleep(self.0).await;
            Ok(BTreeSet::new())
        }
    }

    fn request(modules: &[&str]) -> ReportRequest {
        let entities = modules
            .iter()
            .map(|m| EntityRef::new(format!("{m}_MASTER"), *m))
            .collect();
        ReportRequest::new("trx-listing", entities, ParamBindings::default())
    }

    fn granted(modules: &[&str]) -> StaticAuthority {
        StaticAuthority::new(modules.iter().map(|m| Module::new(*m)))
    }

    #[tokio::test]
    async fn allows_when_every_module_is_granted() {
        let authority = granted(&["AR", "AP"]);
        let gate = AuthorizationGate::new(&authority, Duration::from_secs(1));
        let decision = gate.authorize(&request(&["AR"])).await;
        assert!(matches!(decision, AuthzDecision::Allow { .. }));
    }

    #[tokio::test]
    async fn cross_module_requires_every_module_individually() {
        let authority = granted(&["AR"]);
        let gate = AuthorizationGate::new(&authority, Duration::from_secs(1));
        let decision = gate.authorize(&request(&["AR", "FA"])).await;
        match decision {
            AuthzDecision::Deny { missing } => {
                let missing: Vec<&str> = missing.iter().map(Module::as_str).collect();
                assert_eq!(missing, vec!["FA"]);
            }
            other => panic!("expected Deny, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn collaborator_error_denies_all_requested_modules() {
        let authority = FailingAuthority;
        let gate = AuthorizationGate::new(&authority, Duration::from_secs(1));
        let decision = gate.authorize(&request(&["AR", "AP"])).await;
        match decision {
            AuthzDecision::Deny { missing } => assert_eq!(missing.len(), 2),
            other => panic!("expected Deny, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collaborator_timeout_denies() {
        let authority = SlowAuthority(Duration::from_secs(30));
        let gate = AuthorizationGate::new(&authority, Duration::from_millis(100));
        let decision = gate.authorize(&request(&["AR"])).await;
        assert!(matches!(decision, AuthzDecision::Deny { .. }));
    }

    #[tokio::test]
    async fn one_collaborator_call_per_authorize() {
        let authority = CountingAuthority::new(granted(&["AR"]));
        let gate = AuthorizationGate::new(&authority, Duration::from_secs(1));
        gate.authorize(&request(&["AR"])).await;
        gate.authorize(&request(&["AR"])).await;
        assert_eq!(authority.calls(), 2);
    }
}
