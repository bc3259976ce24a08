//! Constraint validator — the fixed rule battery over a finalized artifact.
//!
//! Five independent, order-independent checks run over every artifact.
//! Violations are collected, never short-circuited, so the caller sees
//! every problem at once. Any non-empty list discards the whole artifact;
//! there is no auto-fix path. All rules are textual/structural pattern
//! matching over stored fragments — no semantic SQL parsing.

use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::composer::{Block, ComposedArtifact};
use crate::types::Stage;

// ---------------------------------------------------------------------------
// RuleId / ConstraintViolation
// ---------------------------------------------------------------------------

/// Identifier of one validator rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    Dialect,
    HintPresence,
    ForbiddenToken,
    TenantJoin,
    StageOrder,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::Dialect => "dialect",
            RuleId::HintPresence => "hint-presence",
            RuleId::ForbiddenToken => "forbidden-token",
            RuleId::TenantJoin => "tenant-join",
            RuleId::StageOrder => "stage-order",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule failure. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintViolation {
    pub rule: RuleId,
    /// Offending block name, if the failure is attributable to one.
    pub block: Option<String>,
    pub explanation: String,
}

// ---------------------------------------------------------------------------
// ValidatorConfig
// ---------------------------------------------------------------------------

/// Tunable knobs for the rule battery. Defaults match the standing policy;
/// overrides come from [`crate::config::EngineConfig`].
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// The approved optimizer hint vocabulary; multi-reference blocks must
    /// declare at least one of these.
    pub required_hints: Vec<String>,
    /// Hint demanded of blocks reused twice or flagged complex.
    pub materialize_hint: String,
    /// Hint demanded of blocks over the large-table threshold.
    pub parallel_hint: String,
    /// Row-estimate threshold above which the parallel hint is mandatory.
    pub large_table_rows: u64,
    /// The single banned literal symbol; forbidden anywhere, comments
    /// included.
    pub forbidden_token: String,
    /// Tenant-scoping columns; every extraction-to-extraction join must
    /// equate on one of these.
    pub tenant_columns: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            required_hints: vec![
                "MATERIALIZE".into(),
                "PARALLEL".into(),
                "LEADING".into(),
                "USE_HASH".into(),
                "INDEX".into(),
            ],
            materialize_hint: "MATERIALIZE".into(),
            parallel_hint: "PARALLEL".into(),
            large_table_rows: 10_000_000,
            forbidden_token: ";".into(),
            tenant_columns: vec!["ORG_ID".into(), "LEDGER_ID".into(), "BU_ID".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// ConstraintValidator
// ---------------------------------------------------------------------------

/// Any ANSI merged-condition join form. Policy mandates traditional
/// comma-list joins with the `(+)` outer-join marker, so the bare JOIN
/// keyword (in any of its spellings) and USING clauses are disallowed.
const DIALECT_PATTERN: &str =
    r"(?i)\b(?:natural\s+)?(?:(?:inner|left|right|full|cross)\s+(?:outer\s+)?)?join\b|\busing\s*\(";

pub struct ConstraintValidator {
    config: ValidatorConfig,
    dialect: Regex,
}

impl ConstraintValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let dialect = Regex::new(DIALECT_PATTERN).expect("dialect pattern is a valid regex");
        Self { config, dialect }
    }

    /// Run all five rules. `Err` carries every violation found.
    pub fn validate(&self, artifact: &ComposedArtifact) -> Result<(), Vec<ConstraintViolation>> {
        let mut violations = Vec::new();
        self.check_dialect(artifact, &mut violations);
        self.check_hints(artifact, &mut violations);
        self.check_forbidden_token(artifact, &mut violations);
        self.check_tenant_joins(artifact, &mut violations);
        self.check_stage_order(artifact, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    // Rule 1 — join syntax dialect.
    fn check_dialect(&self, artifact: &ComposedArtifact, out: &mut Vec<ConstraintViolation>) {
        for block in &artifact.blocks {
            if self.dialect.is_match(&block.body) {
                out.push(ConstraintViolation {
                    rule: RuleId::Dialect,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block '{}' uses ANSI join syntax; traditional comma joins with (+) markers are required",
                        block.name
                    ),
                });
            }
        }
        if self.dialect.is_match(&artifact.projection) {
            out.push(ConstraintViolation {
                rule: RuleId::Dialect,
                block: None,
                explanation: "final projection uses ANSI join syntax".into(),
            });
        }
    }

    // Rule 2 — optimizer hint presence.
    fn check_hints(&self, artifact: &ComposedArtifact, out: &mut Vec<ConstraintViolation>) {
        for block in &artifact.blocks {
            if !matches!(block.stage, Stage::RepositoryExtraction | Stage::Calculation) {
                continue;
            }
            if block.traits.multi_reference
                && !self
                    .config
                    .required_hints
                    .iter()
                    .any(|h| declares_hint(block, h))
            {
                out.push(ConstraintViolation {
                    rule: RuleId::HintPresence,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "multi-reference block '{}' declares none of the required optimizer hints",
                        block.name
                    ),
                });
            }
            if (block.traits.reuse_count >= 2 || block.traits.complex)
                && !declares_hint(block, &self.config.materialize_hint)
            {
                out.push(ConstraintViolation {
                    rule: RuleId::HintPresence,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block '{}' is reused {} time(s){} and must declare the {} hint",
                        block.name,
                        block.traits.reuse_count,
                        if block.traits.complex {
                            " (flagged complex)"
                        } else {
                            ""
                        },
                        self.config.materialize_hint
                    ),
                });
            }
            if block.traits.row_estimate > self.config.large_table_rows
                && !declares_hint(block, &self.config.parallel_hint)
            {
                out.push(ConstraintViolation {
                    rule: RuleId::HintPresence,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block '{}' reads ~{} rows (threshold {}) and must declare the {} hint",
                        block.name,
                        block.traits.row_estimate,
                        self.config.large_table_rows,
                        self.config.parallel_hint
                    ),
                });
            }
        }
    }

    // Rule 3 — banned literal symbol, comments included, no exceptions.
    fn check_forbidden_token(&self, artifact: &ComposedArtifact, out: &mut Vec<ConstraintViolation>) {
        let token = &self.config.forbidden_token;
        if token.is_empty() {
            return;
        }
        for block in &artifact.blocks {
            let in_body = block.body.contains(token);
            let in_doc = block.doc.as_deref().is_some_and(|d| d.contains(token));
            if in_body || in_doc {
                out.push(ConstraintViolation {
                    rule: RuleId::ForbiddenToken,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block '{}' contains the banned token '{}' in its {}",
                        block.name,
                        token,
                        if in_body { "body" } else { "documentation" }
                    ),
                });
            }
        }
        if artifact.projection.contains(token) {
            out.push(ConstraintViolation {
                rule: RuleId::ForbiddenToken,
                block: None,
                explanation: format!("final projection contains the banned token '{token}'"),
            });
        }
    }

    // Rule 4 — tenant-scoping predicate on extraction-to-extraction joins.
    fn check_tenant_joins(&self, artifact: &ComposedArtifact, out: &mut Vec<ConstraintViolation>) {
        let extraction_names: Vec<&str> = artifact
            .blocks_in(Stage::RepositoryExtraction)
            .map(|b| b.name.as_str())
            .collect();

        for block in &artifact.blocks {
            let referenced = extraction_names
                .iter()
                .filter(|n| **n != block.name && references_name(&block.body, n))
                .count();
            // An extraction block joining one sibling, or any other block
            // joining two extraction-derived entities, is a tenant join.
            let joins_extractions = match block.stage {
                Stage::RepositoryExtraction => referenced >= 1,
                _ => referenced >= 2,
            };
            if !joins_extractions {
                continue;
            }
            let scoped = block.join_keys.iter().any(|k| {
                self.config
                    .tenant_columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(k))
            });
            if !scoped {
                out.push(ConstraintViolation {
                    rule: RuleId::TenantJoin,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block '{}' joins repository-extraction entities without an equality predicate on a tenant-scoping column ({})",
                        block.name,
                        self.config.tenant_columns.join(", ")
                    ),
                });
            }
        }
    }

    // Rule 5 — defensive structural recheck: non-decreasing stages, unique
    // block names, the projection as the only Final element.
    fn check_stage_order(&self, artifact: &ComposedArtifact, out: &mut Vec<ConstraintViolation>) {
        let mut names = std::collections::BTreeSet::new();
        for block in &artifact.blocks {
            if !names.insert(block.name.as_str()) {
                out.push(ConstraintViolation {
                    rule: RuleId::StageOrder,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block name '{}' appears more than once; every common table expression must be uniquely named",
                        block.name
                    ),
                });
            }
            if block.stage == Stage::Final {
                out.push(ConstraintViolation {
                    rule: RuleId::StageOrder,
                    block: Some(block.name.clone()),
                    explanation: format!(
                        "block '{}' is final-stage; the projection is the only final element of an artifact",
                        block.name
                    ),
                });
            }
        }
        for pair in artifact.blocks.windows(2) {
            if pair[0].stage > pair[1].stage {
                out.push(ConstraintViolation {
                    rule: RuleId::StageOrder,
                    block: Some(pair[1].name.clone()),
                    explanation: format!(
                        "block '{}' ({}) appears after '{}' ({}); stages must be non-decreasing",
                        pair[1].name, pair[1].stage, pair[0].name, pair[0].stage
                    ),
                });
            }
        }
        if artifact.projection.trim().is_empty() {
            out.push(ConstraintViolation {
                rule: RuleId::StageOrder,
                block: None,
                explanation: "artifact is missing its final projection".into(),
            });
        }
    }
}

/// Whether a block declares the given hint, allowing parameterized forms
/// such as `PARALLEL(4)`.
fn declares_hint(block: &Block, hint: &str) -> bool {
    block.hints.iter().any(|h| {
        let h = h.trim();
        h.eq_ignore_ascii_case(hint)
            || h.to_ascii_uppercase()
                .starts_with(&format!("{}(", hint.to_ascii_uppercase()))
    })
}

/// Word-boundary search for an identifier inside a fragment body.
fn references_name(body: &str, name: &str) -> bool {
    let haystack = body.to_ascii_uppercase();
    let needle = name.to_ascii_uppercase();
    let bytes = haystack.as_bytes();
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(&needle) {
        let at = start + pos;
        let end = at + needle.len();
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
