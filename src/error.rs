//! Crate-level error aggregating every failure a run can hit.

use crate::builder::BuildError;
use crate::policy::ConfigError;
use crate::report::ReportError;
use crate::table::SchemaError;
use crate::types::ValidationError;

/// Any error from loading, building or reporting a web.
///
/// Every variant is fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// Malformed seed identity.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    /// Relationship source does not match the schema.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    /// Invalid policy or configuration.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    /// Traversal failed.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),
    /// Output could not be written.
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
    /// SQL-backed store failed to initialize.
    #[cfg(feature = "postgres")]
    #[error("Store error: {0}")]
    Store(#[from] crate::store::postgres::PostgresError),
}

/// Result alias using [`WebError`].
pub type Result<T, E = WebError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;

    fn parse_seed(raw: &str) -> Result<Identity> {
        Ok(Identity::parse(raw)?)
    }

    #[test]
    fn test_validation_converts() {
        let err = parse_seed("not-an-address").unwrap_err();
        assert!(matches!(err, WebError::Validation(_)));
        assert!(err.to_string().starts_with("Validation error:"));
    }

    #[test]
    fn test_config_converts() {
        let err: WebError = ConfigError::InvalidDepth(0).into();
        assert!(matches!(err, WebError::Config(ConfigError::InvalidDepth(0))));
    }

    #[test]
    fn test_source_selection_errors_convert() {
        let err: WebError = ConfigError::ConflictingSources.into();
        assert!(err.to_string().contains("mutually exclusive"));

        let err: WebError = BuildError::NoSeeds.into();
        assert!(matches!(err, WebError::Build(BuildError::NoSeeds)));
    }
}
