//! Governed query composition engine.
//!
//! Deterministically assembles analytical SQL reports from pre-approved
//! repository fragments, behind a mandatory authorization gate and a fixed
//! constraint battery. The pipeline is a single forward pass:
//!
//! ```text
//! ReportRequest -> AuthorizationGate -> TemplateComposer -> ConstraintValidator -> EngineResult
//!                      │ Deny               │ missing            │ violations
//!                      ▼                    ▼                    ▼
//!                   Refusal         ClarificationNeeded       Refusal
//! ```
//!
//! Three invariants shape everything here:
//!
//! - **Fail-closed authorization**: every referenced module must be
//!   individually granted; a broken or slow collaborator is a denial.
//! - **No fragment synthesis**: the composer can only copy fragments that
//!   exist in the [`pattern_store::PatternStore`] for the exact
//!   (entity, module) pair. A miss is a typed stop, never an invention.
//! - **All-or-nothing emission**: an artifact either passes every
//!   validator rule or is discarded whole. No partial SQL ever escapes.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use governed_query::{
//!     Engine, EngineConfig, EntityRef, ParamBindings, PatternStore, ReportRequest,
//!     StaticAuthority,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(PatternStore::load_from_path("library.yaml".as_ref())?);
//! let authority = Arc::new(StaticAuthority::new(["AR".into()]));
//! let engine = Engine::new(store, authority, EngineConfig::from_env());
//!
//! let request = ReportRequest::new(
//!     "trx-listing",
//!     vec![EntityRef::new("AR_TRX_MASTER", "AR")],
//!     ParamBindings::default(),
//! );
//! println!("{}", engine.generate(&request).await.render());
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod composer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod pattern_store;
pub mod types;
pub mod validator;

pub use authz::{AuthorizationGate, AuthzDecision, CountingAuthority, ModuleAuthority, StaticAuthority};
pub use composer::{Block, ComposeError, ComposedArtifact, TemplateComposer};
pub use config::EngineConfig;
pub use engine::{Clarification, Engine, EngineResult, RefusalReason};
pub use errors::{AuthorityError, PatternLoadError};
pub use pattern_store::{PatternStore, PatternTraits, ReportTemplate, RepositoryPattern};
pub use types::{EntityRef, Module, ParamBindings, ReportRequest, ReportRequestSpec, Stage};
pub use validator::{ConstraintValidator, ConstraintViolation, RuleId, ValidatorConfig};
