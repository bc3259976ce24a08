//! Typed failure model for the engine boundary.
//!
//! Every failure mode is terminal at the engine boundary: nothing here is
//! retried internally, and nothing is recovered by substituting default
//! behavior. Authorization failures of any kind resolve to denial
//! (fail-closed) before they ever reach a caller.

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// AuthorityError — failures talking to the authorization collaborator
// ---------------------------------------------------------------------------

/// Failure reaching or querying the external authorization collaborator.
///
/// The gate maps every variant to `Deny` — a broken collaborator must never
/// widen access.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// The collaborator could not be reached or returned a transport error.
    #[error("authorization collaborator unreachable: {0}")]
    Unreachable(String),

    /// The collaborator did not answer within the configured window.
    #[error("authorization collaborator timed out after {0:?}")]
    Timeout(Duration),
}

// ---------------------------------------------------------------------------
// PatternLoadError — pattern library ingestion failures
// ---------------------------------------------------------------------------

/// Failure loading or validating a pattern library file. Raised at load
/// time only — the store is read-only afterwards and lookups never fail
/// with an error (a missing pattern is a normal `None`).
#[derive(Debug, Error)]
pub enum PatternLoadError {
    #[error("failed to read pattern library {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pattern library is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A pattern declared a stage label outside the five known stages.
    #[error("pattern '{entity}' declares unknown stage '{stage}'")]
    UnknownStage { entity: String, stage: String },

    /// A pattern ended up with no module tags at all.
    #[error("pattern '{entity}' declares an empty module tag set")]
    EmptyModuleTags { entity: String },

    /// Two patterns resolved to the same (entity, module) key.
    #[error("duplicate pattern key ({entity}, {module})")]
    DuplicateKey { entity: String, module: String },

    /// A report template names a period entity with no Period-stage pattern
    /// anywhere in the library.
    #[error("template '{template}' names period entity '{entity}' but no period-stage pattern exists for it")]
    MissingPeriodPattern { template: String, entity: String },

    /// Two report templates share a name.
    #[error("duplicate report template '{template}'")]
    DuplicateTemplate { template: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_errors_render() {
        let e = AuthorityError::Unreachable("connection refused".into());
        assert!(e.to_string().contains("unreachable"));
        let e = AuthorityError::Timeout(Duration::from_millis(250));
        assert!(e.to_string().contains("timed out"));
    }

    #[test]
    fn load_errors_name_the_offender() {
        let e = PatternLoadError::DuplicateKey {
            entity: "AR_TRX_MASTER".into(),
            module: "AR".into(),
        };
        assert!(e.to_string().contains("AR_TRX_MASTER"));
        assert!(e.to_string().contains("AR"));

        let e = PatternLoadError::MissingPeriodPattern {
            template: "aging".into(),
            entity: "GL_PERIODS".into(),
        };
        assert!(e.to_string().contains("aging"));
        assert!(e.to_string().contains("GL_PERIODS"));
    }
}
