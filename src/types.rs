//! Core request model for the composition pipeline.
//!
//! A `ReportRequest` is constructed once per invocation and never mutated.
//! Its module set is *derived* from the entities it names (plus nothing
//! else), so the authorization gate and the composer always agree on which
//! modules a request touches.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Module — opaque business-domain identifier
// ---------------------------------------------------------------------------

/// A business-domain partition (e.g. `AR`, `AP`, `FA`) subject to
/// independent authorization. Opaque and immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Module(String);

impl Module {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Module {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for Module {
    fn from(code: String) -> Self {
        Self(code)
    }
}

// ---------------------------------------------------------------------------
// Stage — the five fixed composition phases, totally ordered
// ---------------------------------------------------------------------------

/// Composition stage. The derived `Ord` is the mandatory block ordering:
/// `Period < RepositoryExtraction < Calculation < Aggregation < Final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Period,
    RepositoryExtraction,
    Calculation,
    Aggregation,
    Final,
}

impl Stage {
    /// All stages in composition order.
    pub const ALL: [Stage; 5] = [
        Stage::Period,
        Stage::RepositoryExtraction,
        Stage::Calculation,
        Stage::Aggregation,
        Stage::Final,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Period => "period",
            Stage::RepositoryExtraction => "repository-extraction",
            Stage::Calculation => "calculation",
            Stage::Aggregation => "aggregation",
            Stage::Final => "final",
        }
    }

    /// Parse a stage label as written in pattern library files.
    pub fn parse(label: &str) -> Option<Stage> {
        match label.trim().to_ascii_lowercase().as_str() {
            "period" => Some(Stage::Period),
            "repository-extraction" => Some(Stage::RepositoryExtraction),
            "calculation" => Some(Stage::Calculation),
            "aggregation" => Some(Stage::Aggregation),
            "final" => Some(Stage::Final),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// EntityRef — one requested entity and the module it lives in
// ---------------------------------------------------------------------------

/// A requested entity paired with the module that owns it. Pattern lookups
/// happen against this exact pair — never against the entity name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    pub module: Module,
}

impl EntityRef {
    pub fn new(name: impl Into<String>, module: impl Into<Module>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// ParamBindings — date bounds and free-form parameters
// ---------------------------------------------------------------------------

/// Parameter bindings supplied with a request. Date bounds drive the
/// Period-stage inclusion rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamBindings {
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ParamBindings {
    pub fn has_date_bounds(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }
}

// ---------------------------------------------------------------------------
// ReportRequest — one immutable invocation of the engine
// ---------------------------------------------------------------------------

/// A structured report request. Built once via [`ReportRequest::new`];
/// `modules` and `cross_module` are computed, never caller-supplied, so the
/// module set can never drift from the entities actually referenced.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRequest {
    /// Correlation id carried through tracing and the artifact header.
    pub request_id: Uuid,
    pub report_type: String,
    pub entities: Vec<EntityRef>,
    pub modules: BTreeSet<Module>,
    pub params: ParamBindings,
    pub cross_module: bool,
}

impl ReportRequest {
    pub fn new(
        report_type: impl Into<String>,
        entities: Vec<EntityRef>,
        params: ParamBindings,
    ) -> Self {
        let modules: BTreeSet<Module> = entities.iter().map(|e| e.module.clone()).collect();
        let cross_module = modules.len() > 1;
        Self {
            request_id: Uuid::new_v4(),
            report_type: report_type.into(),
            entities,
            modules,
            params,
            cross_module,
        }
    }

    /// The module the Period fragment is resolved against: the module of the
    /// first requested entity.
    pub fn primary_module(&self) -> Option<&Module> {
        self.entities
            .first()
            .map(|e| &e.module)
            .or_else(|| self.modules.iter().next())
    }

    /// Requested entities with duplicates removed, preserving first-seen
    /// order. One repository-extraction lookup happens per returned entry.
    pub fn distinct_entities(&self) -> Vec<&EntityRef> {
        let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
        let mut out = Vec::with_capacity(self.entities.len());
        for e in &self.entities {
            if seen.insert((e.name.as_str(), e.module.as_str())) {
                out.push(e);
            }
        }
        out
    }
}

/// Wire shape for a request as submitted by callers (CLI, API). Turned into
/// a [`ReportRequest`] so the derived fields are always recomputed here.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequestSpec {
    pub report_type: String,
    pub entities: Vec<EntityRef>,
    #[serde(default)]
    pub params: ParamBindings,
}

impl ReportRequestSpec {
    pub fn into_request(self) -> ReportRequest {
        ReportRequest::new(self.report_type, self.entities, self.params)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
