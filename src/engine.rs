//! Engine orchestrator — one forward pass through the decision pipeline.
//!
//! ```text
//! Start ──► Authorizing ──► Composing ──► Validating ──► Done(Artifact)
//!               │               │              │
//!               │ Deny          │ missing      │ violations
//!               ▼               ▼              ▼
//!        Done(Refusal)  Done(Clarification)  Done(Refusal)
//! ```
//!
//! Every terminal state is reached in at most one pass: no component is
//! retried, no composition happens before authorization succeeds, and no
//! partial document is ever visible outside `generate()`. The gate's
//! missing-module detail is dropped here — the rendered refusal is
//! fixed-form and names nothing.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::authz::{AuthorizationGate, AuthzDecision, ModuleAuthority};
use crate::composer::{ComposeError, ComposedArtifact, TemplateComposer};
use crate::config::EngineConfig;
use crate::pattern_store::PatternStore;
use crate::types::{Module, ReportRequest, Stage};
use crate::validator::{ConstraintValidator, ConstraintViolation};

// ---------------------------------------------------------------------------
// EngineResult and friends
// ---------------------------------------------------------------------------

/// Why generation was refused. The rendered form is always the same two
/// fixed lines; the violation detail stays programmatic.
#[derive(Debug, Clone)]
pub enum RefusalReason {
    /// At least one requested module is outside the caller's grant (or the
    /// collaborator was unavailable — fail-closed collapses the two).
    UnauthorizedModule,
    /// One or more validator rules failed; the whole artifact was
    /// discarded. Every violation is listed, none auto-fixed.
    ConstraintViolation {
        violations: Vec<ConstraintViolation>,
    },
}

/// What is missing before composition can proceed. No SQL of any kind
/// accompanies a clarification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clarification {
    MissingPattern { entity: String, module: Module },
    UnknownReportType { report_type: String },
    ModuleIdentification,
}

/// The one result type of `generate()` — exactly one of three shapes.
#[derive(Debug, Clone)]
pub enum EngineResult {
    Artifact(ComposedArtifact),
    Refusal(RefusalReason),
    ClarificationNeeded(Clarification),
}

impl EngineResult {
    pub fn is_artifact(&self) -> bool {
        matches!(self, EngineResult::Artifact(_))
    }

    /// Render the outcome for the caller. Artifacts render as one ordered
    /// document; refusals render as exactly two fixed lines with no
    /// further content; clarifications name the missing input and stop.
    pub fn render(&self) -> String {
        match self {
            EngineResult::Artifact(artifact) => render_artifact(artifact),
            EngineResult::Refusal(reason) => render_refusal(reason),
            EngineResult::ClarificationNeeded(clarification) => {
                render_clarification(clarification)
            }
        }
    }
}

fn render_artifact(artifact: &ComposedArtifact) -> String {
    let mut out = String::new();
    out.push_str(&format!("-- Report: {}\n", artifact.report_type));
    out.push_str(&format!("-- Request: {}\n", artifact.request_id));
    out.push_str(&format!(
        "-- Composed: {}\n",
        artifact.composed_at.to_rfc3339()
    ));

    let mut current_stage: Option<Stage> = None;
    for (idx, block) in artifact.blocks.iter().enumerate() {
        if current_stage != Some(block.stage) {
            out.push_str(&format!("-- stage: {}\n", block.stage));
            current_stage = Some(block.stage);
        }
        if let Some(doc) = &block.doc {
            for line in doc.lines() {
                out.push_str(&format!("-- {line}\n"));
            }
        }
        if idx == 0 {
            out.push_str("WITH ");
        }
        out.push_str(&format!("{} AS (\n", block.name));
        for line in block.body.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        out.push(')');
        if idx + 1 < artifact.blocks.len() {
            out.push(',');
        }
        out.push('\n');
    }

    out.push_str("-- stage: final\n");
    out.push_str(&artifact.projection);
    out.push('\n');
    out
}

fn render_refusal(reason: &RefusalReason) -> String {
    let class = match reason {
        RefusalReason::UnauthorizedModule => "unauthorized module",
        RefusalReason::ConstraintViolation { .. } => "constraint violation",
    };
    format!("Report generation refused.\nReason: {class}.\n")
}

fn render_clarification(clarification: &Clarification) -> String {
    match clarification {
        Clarification::MissingPattern { entity, module } => format!(
            "Additional input required before composition can proceed.\nMissing repository pattern for entity '{entity}' in module '{module}'.\n"
        ),
        Clarification::UnknownReportType { report_type } => format!(
            "Additional input required before composition can proceed.\nNo report template named '{report_type}' is available.\n"
        ),
        Clarification::ModuleIdentification => "Additional input required before composition can proceed.\nThe request names no entities, so no module can be identified.\n".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Pipeline phase, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Authorizing,
    Composing,
    Validating,
    Done,
}

/// The orchestrator. Holds the read-only pattern store and the external
/// authorization collaborator; per-request state never outlives
/// `generate()`.
pub struct Engine {
    store: Arc<PatternStore>,
    authority: Arc<dyn ModuleAuthority>,
    validator: ConstraintValidator,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        store: Arc<PatternStore>,
        authority: Arc<dyn ModuleAuthority>,
        config: EngineConfig,
    ) -> Self {
        let validator = ConstraintValidator::new(config.validator.clone());
        Self {
            store,
            authority,
            validator,
            config,
        }
    }

    /// Process one request to a terminal result. Authorization always
    /// completes before composition begins, and composition completes
    /// fully before validation begins.
    pub async fn generate(&self, request: &ReportRequest) -> EngineResult {
        debug!(request_id = %request.request_id, phase = ?Phase::Authorizing, "pipeline transition");
        let gate = AuthorizationGate::new(self.authority.as_ref(), self.config.authority_timeout);
        match gate.authorize(request).await {
            AuthzDecision::Deny { missing } => {
                // Audit the denial detail, then drop it: the refusal that
                // crosses the boundary must not leak which modules exist.
                warn!(
                    request_id = %request.request_id,
                    missing_count = missing.len(),
                    phase = ?Phase::Done,
                    "refused: unauthorized module(s)"
                );
                return EngineResult::Refusal(RefusalReason::UnauthorizedModule);
            }
            AuthzDecision::Allow { .. } => {}
        }

        debug!(request_id = %request.request_id, phase = ?Phase::Composing, "pipeline transition");
        let composer = TemplateComposer::new(&self.store);
        let artifact = match composer.compose(request) {
            Ok(artifact) => artifact,
            Err(ComposeError::MissingPattern { entity, module }) => {
                info!(request_id = %request.request_id, %entity, %module, phase = ?Phase::Done, "clarification: missing pattern");
                return EngineResult::ClarificationNeeded(Clarification::MissingPattern {
                    entity,
                    module,
                });
            }
            Err(ComposeError::UnknownReportType(report_type)) => {
                info!(request_id = %request.request_id, %report_type, phase = ?Phase::Done, "clarification: unknown report type");
                return EngineResult::ClarificationNeeded(Clarification::UnknownReportType {
                    report_type,
                });
            }
            Err(ComposeError::NoEntities) => {
                info!(request_id = %request.request_id, phase = ?Phase::Done, "clarification: module identification");
                return EngineResult::ClarificationNeeded(Clarification::ModuleIdentification);
            }
        };

        debug!(request_id = %request.request_id, phase = ?Phase::Validating, "pipeline transition");
        match self.validator.validate(&artifact) {
            Err(violations) => {
                warn!(
                    request_id = %request.request_id,
                    violations = violations.len(),
                    phase = ?Phase::Done,
                    "refused: constraint violation(s); artifact discarded"
                );
                EngineResult::Refusal(RefusalReason::ConstraintViolation { violations })
            }
            Ok(()) => {
                info!(
                    request_id = %request.request_id,
                    blocks = artifact.blocks.len(),
                    phase = ?Phase::Done,
                    "artifact composed and validated"
                );
                EngineResult::Artifact(artifact)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::Block;
    use crate::pattern_store::PatternTraits;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_artifact() -> ComposedArtifact {
        ComposedArtifact {
            request_id: Uuid::nil(),
            report_type: "trx-listing".into(),
            blocks: vec![
                Block {
                    stage: Stage::Period,
                    name: "GL_PERIODS".into(),
                    body: "SELECT p.period_name\nFROM gl_periods p".into(),
                    doc: Some("Open periods inside the requested window".into()),
                    exposes: vec!["PERIOD_NAME".into()],
                    hints: vec![],
                    join_keys: vec![],
                    traits: PatternTraits::default(),
                },
                Block {
                    stage: Stage::RepositoryExtraction,
                    name: "AR_TRX_MASTER".into(),
                    body: "SELECT t.trx_number\nFROM ra_customer_trx_all t".into(),
                    doc: None,
                    exposes: vec!["TRX_NUMBER".into()],
                    hints: vec![],
                    join_keys: vec!["ORG_ID".into()],
                    traits: PatternTraits::default(),
                },
            ],
            projection: "SELECT TRX_NUMBER\nFROM AR_TRX_MASTER".into(),
            composed_at: Utc::now(),
        }
    }

    #[test]
    fn artifact_renders_sections_in_literal_order() {
        let rendered = EngineResult::Artifact(sample_artifact()).render();
        let header = rendered.find("-- Report:").unwrap();
        let period = rendered.find("-- stage: period").unwrap();
        let extraction = rendered.find("-- stage: repository-extraction").unwrap();
        let final_section = rendered.find("-- stage: final").unwrap();
        assert!(header < period && period < extraction && extraction < final_section);
        assert!(rendered.contains("WITH GL_PERIODS AS ("));
        assert!(rendered.contains("AR_TRX_MASTER AS ("));
        assert!(rendered.trim_end().ends_with("FROM AR_TRX_MASTER"));
    }

    #[test]
    fn refusal_renders_exactly_two_lines() {
        let rendered = EngineResult::Refusal(RefusalReason::UnauthorizedModule).render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec!["Report generation refused.", "Reason: unauthorized module."]
        );

        let rendered = EngineResult::Refusal(RefusalReason::ConstraintViolation {
            violations: vec![],
        })
        .render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines,
            vec!["Report generation refused.", "Reason: constraint violation."]
        );
    }

    #[test]
    fn clarification_names_the_missing_pair_and_carries_no_sql() {
        let rendered = EngineResult::ClarificationNeeded(Clarification::MissingPattern {
            entity: "AP_INV_MASTER".into(),
            module: Module::new("AP"),
        })
        .render();
        assert!(rendered.contains("AP_INV_MASTER"));
        assert!(rendered.contains("'AP'"));
        for keyword in ["SELECT", "FROM", "WHERE", "WITH ", "JOIN"] {
            assert!(
                !rendered.to_uppercase().contains(keyword),
                "clarification leaked '{keyword}'"
            );
        }
    }
}
