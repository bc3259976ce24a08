//! Read-only repository of pre-approved composition fragments.
//!
//! The store is the *only* source of SQL text the composer may draw from.
//! `lookup()` returning `None` is a normal outcome meaning "pattern
//! missing" — it feeds the stop-and-request path and is never license to
//! synthesize a substitute fragment. Load-time validation guarantees every
//! pattern carries exactly one stage and a non-empty module tag set;
//! after load the store is immutable and safe to share across requests.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::PatternLoadError;
use crate::types::{Module, Stage};

// ---------------------------------------------------------------------------
// RepositoryPattern — one pre-approved fragment
// ---------------------------------------------------------------------------

/// Author-declared characteristics of a fragment, consumed by the
/// hint-presence rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternTraits {
    /// Fragment references more than one underlying table.
    #[serde(default)]
    pub multi_reference: bool,
    /// How many times downstream blocks re-read this fragment.
    #[serde(default)]
    pub reuse_count: u32,
    /// Author flagged the fragment as complex.
    #[serde(default)]
    pub complex: bool,
    /// Estimated row count of the largest table the fragment reads.
    #[serde(default)]
    pub row_estimate: u64,
}

/// A named, versioned composition fragment. Belongs to exactly one stage,
/// tagged with every module it is valid for, keyed by (entity, module).
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryPattern {
    pub entity: String,
    pub stage: Stage,
    pub version: u32,
    pub modules: BTreeSet<Module>,
    /// The fragment body — stored verbatim, emitted verbatim.
    pub body: String,
    /// Inline documentation carried into the rendered artifact.
    pub doc: Option<String>,
    /// Columns this fragment exposes to later stages.
    pub exposes: Vec<String>,
    /// Optimizer hints the author declared for this fragment.
    pub hints: Vec<String>,
    /// Join keys the fragment's join conditions equate on.
    pub join_keys: Vec<String>,
    pub traits: PatternTraits,
}

// ---------------------------------------------------------------------------
// ReportTemplate — which entities/stages a report type requires
// ---------------------------------------------------------------------------

/// A report-type template (e.g. "aging"): names the period entity and the
/// calculation/aggregation entities that report requires. Repository
/// entities come from the request itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub period_entity: Option<String>,
    #[serde(default)]
    pub calculation_entities: Vec<String>,
    #[serde(default)]
    pub aggregation_entities: Vec<String>,
}

impl ReportTemplate {
    pub fn has_derived_stages(&self) -> bool {
        !self.calculation_entities.is_empty() || !self.aggregation_entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Library file format (YAML)
// ---------------------------------------------------------------------------

/// Root of a pattern library YAML file: fragments grouped per business
/// module, plus the report-type templates.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryFile {
    #[serde(default)]
    pub description: Option<String>,
    pub modules: Vec<ModuleGroup>,
    #[serde(default)]
    pub templates: Vec<ReportTemplate>,
}

/// One module's worth of patterns.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleGroup {
    pub module: String,
    #[serde(default)]
    pub description: Option<String>,
    pub patterns: Vec<PatternConfig>,
}

/// On-disk shape of a single pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternConfig {
    pub entity: String,
    /// Stage label: period | repository-extraction | calculation |
    /// aggregation | final.
    pub stage: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Additional modules (beyond the owning group) this pattern is valid
    /// for — used for shared fragments like fiscal-period lookups.
    #[serde(default)]
    pub shared_with: Vec<String>,
    pub body: String,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub exposes: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub join_keys: Vec<String>,
    #[serde(default)]
    pub traits: PatternTraits,
}

fn default_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// PatternStore
// ---------------------------------------------------------------------------

/// The read-only pattern repository. Built once, queried concurrently, no
/// interior mutability.
#[derive(Debug)]
pub struct PatternStore {
    patterns: HashMap<(String, Module), RepositoryPattern>,
    templates: HashMap<String, ReportTemplate>,
}

impl PatternStore {
    /// Build a store from already-materialized patterns and templates,
    /// running the full load-time validation battery.
    pub fn from_patterns(
        patterns: Vec<RepositoryPattern>,
        templates: Vec<ReportTemplate>,
    ) -> Result<Self, PatternLoadError> {
        let mut by_key: HashMap<(String, Module), RepositoryPattern> = HashMap::new();
        for pattern in patterns {
            if pattern.modules.is_empty()
                || pattern.modules.iter().all(|m| m.as_str().trim().is_empty())
            {
                return Err(PatternLoadError::EmptyModuleTags {
                    entity: pattern.entity.clone(),
                });
            }
            for module in &pattern.modules {
                let key = (pattern.entity.clone(), module.clone());
                if by_key.contains_key(&key) {
                    return Err(PatternLoadError::DuplicateKey {
                        entity: pattern.entity.clone(),
                        module: module.to_string(),
                    });
                }
                by_key.insert(key, pattern.clone());
            }
        }

        let mut by_name: HashMap<String, ReportTemplate> = HashMap::new();
        for template in templates {
            if let Some(period_entity) = &template.period_entity {
                let has_period = by_key
                    .iter()
                    .any(|((entity, _), p)| entity == period_entity && p.stage == Stage::Period);
                if !has_period {
                    return Err(PatternLoadError::MissingPeriodPattern {
                        template: template.name.clone(),
                        entity: period_entity.clone(),
                    });
                }
            }
            if by_name.contains_key(&template.name) {
                return Err(PatternLoadError::DuplicateTemplate {
                    template: template.name.clone(),
                });
            }
            by_name.insert(template.name.clone(), template);
        }

        info!(
            patterns = by_key.len(),
            templates = by_name.len(),
            "pattern store loaded"
        );
        Ok(Self {
            patterns: by_key,
            templates: by_name,
        })
    }

    /// Parse a library from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PatternLoadError> {
        let file: LibraryFile = serde_yaml::from_str(yaml)?;
        let mut patterns = Vec::new();
        for group in &file.modules {
            for cfg in &group.patterns {
                let stage =
                    Stage::parse(&cfg.stage).ok_or_else(|| PatternLoadError::UnknownStage {
                        entity: cfg.entity.clone(),
                        stage: cfg.stage.clone(),
                    })?;
                let mut modules: BTreeSet<Module> = BTreeSet::new();
                if !group.module.trim().is_empty() {
                    modules.insert(Module::new(group.module.clone()));
                }
                for shared in &cfg.shared_with {
                    if !shared.trim().is_empty() {
                        modules.insert(Module::new(shared.clone()));
                    }
                }
                debug!(entity = %cfg.entity, stage = %stage, "loaded pattern");
                patterns.push(RepositoryPattern {
                    entity: cfg.entity.clone(),
                    stage,
                    version: cfg.version,
                    modules,
                    body: cfg.body.clone(),
                    doc: cfg.doc.clone(),
                    exposes: cfg.exposes.clone(),
                    hints: cfg.hints.clone(),
                    join_keys: cfg.join_keys.clone(),
                    traits: cfg.traits,
                });
            }
        }
        Self::from_patterns(patterns, file.templates)
    }

    /// Load a library YAML file from disk.
    pub fn load_from_path(path: &Path) -> Result<Self, PatternLoadError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| PatternLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Fetch the fragment for the exact (entity, module) pair. `None` means
    /// "pattern missing" — callers stop and request, they never substitute.
    pub fn lookup(&self, entity: &str, module: &Module) -> Option<&RepositoryPattern> {
        self.patterns.get(&(entity.to_string(), module.clone()))
    }

    pub fn template(&self, report_type: &str) -> Option<&ReportTemplate> {
        self.templates.get(report_type)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LIBRARY: &str = r#"
description: AR test library
modules:
  - module: AR
    description: Receivables
    patterns:
      - entity: GL_PERIODS
        stage: period
        shared_with: [AP]
        body: |
          SELECT p.period_name, p.start_date, p.end_date
          FROM gl_periods p
          WHERE p.start_date >= :date_from
            AND p.end_date <= :date_to
        exposes: [PERIOD_NAME, START_DATE, END_DATE]
      - entity: AR_TRX_MASTER
        stage: repository-extraction
        version: 3
        body: |
          SELECT /*+ LEADING(t) */ t.customer_trx_id, t.trx_number, t.org_id
          FROM ra_customer_trx_all t
          WHERE t.org_id = :org_id
        exposes: [CUSTOMER_TRX_ID, TRX_NUMBER, ORG_ID]
        hints: [LEADING]
        join_keys: [ORG_ID]
        traits:
          multi_reference: false
          row_estimate: 4000000
templates:
  - name: trx-listing
    period_entity: GL_PERIODS
  - name: aging
    period_entity: GL_PERIODS
    calculation_entities: [AR_AGING_CALC]
    aggregation_entities: [AR_AGING_BUCKETS]
"#;

    #[test]
    fn loads_yaml_library() {
        let store = PatternStore::from_yaml_str(LIBRARY).unwrap();
        assert_eq!(store.template_count(), 2);
        // GL_PERIODS is shared with AP, AR_TRX_MASTER is AR-only.
        assert_eq!(store.pattern_count(), 3);

        let p = store.lookup("AR_TRX_MASTER", &Module::new("AR")).unwrap();
        assert_eq!(p.stage, Stage::RepositoryExtraction);
        assert_eq!(p.version, 3);
        assert_eq!(p.traits.row_estimate, 4_000_000);
    }

    #[test]
    fn lookup_misses_are_none_not_errors() {
        let store = PatternStore::from_yaml_str(LIBRARY).unwrap();
        assert!(store.lookup("AR_TRX_MASTER", &Module::new("AP")).is_none());
        assert!(store.lookup("NO_SUCH_ENTITY", &Module::new("AR")).is_none());
        assert!(store.template("no-such-report").is_none());
    }

    #[test]
    fn shared_fragment_resolves_in_both_modules() {
        let store = PatternStore::from_yaml_str(LIBRARY).unwrap();
        assert!(store.lookup("GL_PERIODS", &Module::new("AR")).is_some());
        assert!(store.lookup("GL_PERIODS", &Module::new("AP")).is_some());
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let yaml = LIBRARY.replace("stage: period", "stage: projection");
        let err = PatternStore::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, PatternLoadError::UnknownStage { .. }));
    }

    #[test]
    fn duplicate_key_is_rejected() {
        fn pattern(entity: &str, module: &str) -> RepositoryPattern {
            RepositoryPattern {
                entity: entity.into(),
                stage: Stage::RepositoryExtraction,
                version: 1,
                modules: [Module::new(module)].into_iter().collect(),
                body: "SELECT 1 FROM dual".into(),
                doc: None,
                exposes: vec![],
                hints: vec![],
                join_keys: vec![],
                traits: PatternTraits::default(),
            }
        }
        let err = PatternStore::from_patterns(
            vec![pattern("AR_TRX_MASTER", "AR"), pattern("AR_TRX_MASTER", "AR")],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, PatternLoadError::DuplicateKey { .. }));
    }

    #[test]
    fn empty_module_tags_are_rejected() {
        let orphan = RepositoryPattern {
            entity: "ORPHAN".into(),
            stage: Stage::Calculation,
            version: 1,
            modules: BTreeSet::new(),
            body: "SELECT 1 FROM dual".into(),
            doc: None,
            exposes: vec![],
            hints: vec![],
            join_keys: vec![],
            traits: PatternTraits::default(),
        };
        let err = PatternStore::from_patterns(vec![orphan], vec![]).unwrap_err();
        assert!(matches!(err, PatternLoadError::EmptyModuleTags { .. }));
    }

    #[test]
    fn template_with_unresolvable_period_entity_is_rejected() {
        let yaml = LIBRARY.replace("period_entity: GL_PERIODS", "period_entity: XX_PERIODS");
        let err = PatternStore::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, PatternLoadError::MissingPeriodPattern { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LIBRARY.as_bytes()).unwrap();
        let store = PatternStore::load_from_path(file.path()).unwrap();
        assert_eq!(store.template_count(), 2);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = PatternStore::load_from_path(Path::new("/no/such/library.yaml")).unwrap_err();
        assert!(err.to_string().contains("/no/such/library.yaml"));
    }
}
