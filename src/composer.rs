//! Template composer — stage-ordered assembly of the draft artifact.
//!
//! The composer walks the five stages in their fixed total order and pulls
//! every required fragment from the pattern store. There is deliberately no
//! code path that can synthesize a block: the first missing (entity, module)
//! pair halts composition with a typed outcome. Blocks are appended
//! strictly in stage order no matter what order the request listed its
//! entities in.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::pattern_store::{PatternStore, PatternTraits, RepositoryPattern};
use crate::types::{Module, ReportRequest, Stage};

// ---------------------------------------------------------------------------
// Block / ComposedArtifact
// ---------------------------------------------------------------------------

/// One named block of the composed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub stage: Stage,
    pub name: String,
    pub body: String,
    pub doc: Option<String>,
    /// Columns this block exposes to later stages and the projection.
    pub exposes: Vec<String>,
    pub hints: Vec<String>,
    pub join_keys: Vec<String>,
    pub traits: PatternTraits,
}

impl Block {
    fn from_pattern(pattern: &RepositoryPattern) -> Self {
        Self {
            stage: pattern.stage,
            name: pattern.entity.clone(),
            body: pattern.body.trim_end().to_string(),
            doc: pattern.doc.clone(),
            exposes: pattern.exposes.clone(),
            hints: pattern.hints.clone(),
            join_keys: pattern.join_keys.clone(),
            traits: pattern.traits,
        }
    }
}

/// The finalized composed document: an ordered block sequence plus the
/// final projection. Immutable once returned by the composer; the
/// validator sees exactly what would be emitted.
#[derive(Debug, Clone, Serialize)]
pub struct ComposedArtifact {
    pub request_id: Uuid,
    pub report_type: String,
    pub blocks: Vec<Block>,
    /// The Final-stage projection over the exposed columns of the prior
    /// stages. Structural only — business rules live in Calculation blocks.
    pub projection: String,
    pub composed_at: DateTime<Utc>,
}

impl ComposedArtifact {
    pub fn blocks_in(&self, stage: Stage) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(move |b| b.stage == stage)
    }

    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|b| b.name.as_str())
    }
}

// ---------------------------------------------------------------------------
// ComposeError
// ---------------------------------------------------------------------------

/// Typed composition halt. Both variants feed the stop-and-request path —
/// composition never falls back, skips a stage, or invents a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// No report template with this name exists in the library.
    #[error("no report template named '{0}' is defined in the pattern library")]
    UnknownReportType(String),

    /// The exact (entity, module) pair has no approved fragment.
    #[error("no approved pattern exists for entity '{entity}' in module '{module}'")]
    MissingPattern { entity: String, module: Module },

    /// The request names no entities, so no module can be identified.
    #[error("the request names no entities; module identification is required")]
    NoEntities,
}

// ---------------------------------------------------------------------------
// TemplateComposer
// ---------------------------------------------------------------------------

/// Assembles a draft artifact for an already-authorized request.
pub struct TemplateComposer<'a> {
    store: &'a PatternStore,
}

impl<'a> TemplateComposer<'a> {
    pub fn new(store: &'a PatternStore) -> Self {
        Self { store }
    }

    /// Compose the artifact, stage by stage in the fixed total order.
    pub fn compose(&self, request: &ReportRequest) -> Result<ComposedArtifact, ComposeError> {
        let template = self
            .store
            .template(&request.report_type)
            .ok_or_else(|| ComposeError::UnknownReportType(request.report_type.clone()))?;

        let primary = request
            .primary_module()
            .ok_or(ComposeError::NoEntities)?
            .clone();

        // Lookup order: period entity (when the request carries date
        // parameters), then distinct requested entities, then the
        // template's calculation and aggregation entities against the
        // primary module. Each (entity, module) pair composes at most once
        // even when the request names an entity the template also names.
        let mut pending: Vec<(String, Module)> = Vec::new();
        if request.params.has_date_bounds() {
            if let Some(period_entity) = &template.period_entity {
                pending.push((period_entity.clone(), primary.clone()));
            }
        }
        for entity in request.distinct_entities() {
            pending.push((entity.name.clone(), entity.module.clone()));
        }
        for entity in &template.calculation_entities {
            pending.push((entity.clone(), primary.clone()));
        }
        for entity in &template.aggregation_entities {
            pending.push((entity.clone(), primary.clone()));
        }

        // Emission order is the stage total order, not lookup order: each
        // block lands in its own stage's bucket, and buckets are appended
        // Period first, Final-adjacent last. Within a bucket, lookup order
        // is preserved.
        let mut staged: [Vec<Block>; Stage::ALL.len()] = Default::default();
        let mut seen: BTreeSet<(String, Module)> = BTreeSet::new();
        for (entity, module) in pending {
            if !seen.insert((entity.clone(), module.clone())) {
                continue;
            }
            let block = self.lookup_block(&entity, &module)?;
            staged[block.stage as usize].push(block);
        }
        let blocks: Vec<Block> = staged.into_iter().flatten().collect();

        // Final — always materializes last: a projection over the exposed
        // columns of the prior stages, never new business logic.
        let projection = Self::build_projection(&blocks);

        debug!(
            request_id = %request.request_id,
            blocks = blocks.len(),
            "composition complete"
        );

        Ok(ComposedArtifact {
            request_id: request.request_id,
            report_type: request.report_type.clone(),
            blocks,
            projection,
            composed_at: Utc::now(),
        })
    }

    fn lookup_block(&self, entity: &str, module: &Module) -> Result<Block, ComposeError> {
        match self.store.lookup(entity, module) {
            Some(pattern) => {
                debug!(entity, %module, stage = %pattern.stage, "pattern resolved");
                Ok(Block::from_pattern(pattern))
            }
            None => Err(ComposeError::MissingPattern {
                entity: entity.to_string(),
                module: module.clone(),
            }),
        }
    }

    /// Project from the last block: its exposed columns if declared,
    /// otherwise the union of every exposed column, otherwise everything.
    fn build_projection(blocks: &[Block]) -> String {
        let source = blocks
            .last()
            .map(|b| b.name.as_str())
            .unwrap_or("dual");

        let last_exposes = blocks.last().map(|b| b.exposes.as_slice()).unwrap_or(&[]);

        let columns = if !last_exposes.is_empty() {
            last_exposes.join(", ")
        } else {
            let mut seen = std::collections::BTreeSet::new();
            let union: Vec<&str> = blocks
                .iter()
                .flat_map(|b| b.exposes.iter())
                .map(String::as_str)
                .filter(|c| seen.insert(c.to_string()))
                .collect();
            if union.is_empty() {
                "*".to_string()
            } else {
                union.join(", ")
            }
        };

        format!("SELECT {columns}\nFROM {source}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
