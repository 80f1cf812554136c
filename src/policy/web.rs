//! WebPolicy: depth bound, fan-out thresholds, ignore lists.
//!
//! The policy is validated once before any data is loaded or traversed.
//! `params_hash` covers every parameter that changes the resulting web, so
//! two runs with equal hashes over the same table produce identical webs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::canonical::canonical_hash_hex;
use crate::types::{Identity, PermissionType};

/// Default traversal depth bound.
pub const DEFAULT_MAX_DEPTH: u32 = 100;

/// Default fan-out threshold for mailboxes and trustees.
pub const DEFAULT_FANOUT_THRESHOLD: usize = 500;

/// Error raised for invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Depth bound below 1.
    #[error("max_depth must be >= 1, got {0}")]
    InvalidDepth(i64),
    /// Fan-out threshold below 1.
    #[error("{name} must be >= 1, got {value}")]
    InvalidThreshold {
        /// Parameter name.
        name: &'static str,
        /// Rejected value.
        value: i64,
    },
    /// Node cap of zero.
    #[error("max_nodes must be >= 1 when set")]
    InvalidNodeLimit,
    /// SQL table name is not a plain identifier.
    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),
    /// Permission name that matches no known type.
    #[error("Unknown permission type {0:?}")]
    UnknownPermission(String),
    /// Neither CSV inputs nor a database were given.
    #[error("No relationship source configured: pass CSV inputs or a database URL")]
    NoSource,
    /// Both CSV inputs and a database were given.
    #[error("CSV inputs and a database URL are mutually exclusive")]
    ConflictingSources,
    /// A requested backend was not compiled in.
    #[error("{0} support requires building with the `{0}` feature")]
    FeatureDisabled(&'static str),
    /// Policy or seed file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    /// Policy file is not valid JSON.
    #[error("Invalid policy JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parameters hashed into `params_hash`.
#[derive(Serialize)]
struct HashedParams<'a> {
    max_depth: u32,
    permissive_mailbox_threshold: usize,
    power_trustee_threshold: usize,
    ignore_mailbox: &'a BTreeSet<Identity>,
    ignore_trustee: &'a BTreeSet<Identity>,
    ignore_permission: &'a BTreeSet<PermissionType>,
    max_nodes: Option<usize>,
}

/// Traversal policy.
///
/// ## Parameters
///
/// - `max_depth`: hop limit from the nearest seed
/// - `permissive_mailbox_threshold`: mailboxes with more trustees are dropped
/// - `power_trustee_threshold`: trustees on more mailboxes are dropped
/// - `ignore_*`: rows removed before deduplication and thresholds
/// - `max_nodes`: optional cap; exceeding it fails the run
/// - `deadline_secs`: optional wall-clock limit for the traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebPolicy {
    /// Maximum depth from any seed.
    pub max_depth: u32,
    /// Maximum trustees per mailbox before the mailbox is excluded.
    pub permissive_mailbox_threshold: usize,
    /// Maximum mailboxes per trustee before the trustee is excluded.
    pub power_trustee_threshold: usize,
    /// Mailbox identities whose rows are ignored.
    pub ignore_mailbox: BTreeSet<Identity>,
    /// Trustee identities whose rows are ignored.
    pub ignore_trustee: BTreeSet<Identity>,
    /// Permission kinds whose rows are ignored.
    pub ignore_permission: BTreeSet<PermissionType>,
    /// Optional node cap.
    pub max_nodes: Option<usize>,
    /// Optional traversal time limit in seconds.
    pub deadline_secs: Option<u64>,
}

impl Default for WebPolicy {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            permissive_mailbox_threshold: DEFAULT_FANOUT_THRESHOLD,
            power_trustee_threshold: DEFAULT_FANOUT_THRESHOLD,
            ignore_mailbox: BTreeSet::new(),
            ignore_trustee: BTreeSet::new(),
            ignore_permission: BTreeSet::new(),
            max_nodes: None,
            deadline_secs: None,
        }
    }
}

impl WebPolicy {
    /// Create a policy with the given bounds and no ignore lists.
    pub fn new(max_depth: u32, permissive_mailbox_threshold: usize, power_trustee_threshold: usize) -> Self {
        Self {
            max_depth,
            permissive_mailbox_threshold,
            power_trustee_threshold,
            ..Self::default()
        }
    }

    /// Load a policy from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let policy: Self = serde_json::from_slice(&bytes)?;
        Ok(policy)
    }

    /// Reject non-positive bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth < 1 {
            return Err(ConfigError::InvalidDepth(self.max_depth.into()));
        }
        if self.permissive_mailbox_threshold < 1 {
            return Err(ConfigError::InvalidThreshold {
                name: "permissive_mailbox_threshold",
                value: self.permissive_mailbox_threshold as i64,
            });
        }
        if self.power_trustee_threshold < 1 {
            return Err(ConfigError::InvalidThreshold {
                name: "power_trustee_threshold",
                value: self.power_trustee_threshold as i64,
            });
        }
        if self.max_nodes == Some(0) {
            return Err(ConfigError::InvalidNodeLimit);
        }
        Ok(())
    }

    /// Add a permission type, by any accepted spelling, to the ignore list.
    pub fn ignore_permission_named(&mut self, name: &str) -> Result<(), ConfigError> {
        let permission =
            PermissionType::from_str(name).ok_or_else(|| ConfigError::UnknownPermission(name.to_string()))?;
        self.ignore_permission.insert(permission);
        Ok(())
    }

    /// Traversal time limit, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    /// Whether a row with this mailbox, trustee and permission is ignored.
    pub fn ignores(&self, mailbox: &Identity, trustee: &Identity, permission: PermissionType) -> bool {
        self.ignore_mailbox.contains(mailbox)
            || self.ignore_trustee.contains(trustee)
            || self.ignore_permission.contains(&permission)
    }

    /// Compute a hash of the parameters that shape the web.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(&HashedParams {
            max_depth: self.max_depth,
            permissive_mailbox_threshold: self.permissive_mailbox_threshold,
            power_trustee_threshold: self.power_trustee_threshold,
            ignore_mailbox: &self.ignore_mailbox,
            ignore_trustee: &self.ignore_trustee,
            ignore_permission: &self.ignore_permission,
            max_nodes: self.max_nodes,
        })
    }
}

/// Convert a signed depth from user input, rejecting values below 1.
pub fn depth_from_i64(value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|d| *d >= 1)
        .ok_or(ConfigError::InvalidDepth(value))
}

/// Convert a signed threshold from user input, rejecting values below 1.
pub fn threshold_from_i64(name: &'static str, value: i64) -> Result<usize, ConfigError> {
    usize::try_from(value)
        .ok()
        .filter(|t| *t >= 1)
        .ok_or(ConfigError::InvalidThreshold { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_permission_named() {
        let mut policy = WebPolicy::default();
        policy.ignore_permission_named("Send On Behalf Of").unwrap();
        assert!(policy.ignore_permission.contains(&PermissionType::SendOnBehalf));

        let err = policy.ignore_permission_named("Owner").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPermission(ref name) if name == "Owner"));
    }

    #[test]
    fn test_defaults() {
        let policy = WebPolicy::default();
        assert_eq!(policy.max_depth, 100);
        assert_eq!(policy.permissive_mailbox_threshold, 500);
        assert_eq!(policy.power_trustee_threshold, 500);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(matches!(WebPolicy::new(0, 1, 1).validate(), Err(ConfigError::InvalidDepth(0))));
        assert!(matches!(
            WebPolicy::new(1, 0, 1).validate(),
            Err(ConfigError::InvalidThreshold { name: "permissive_mailbox_threshold", .. })
        ));
        assert!(matches!(
            WebPolicy::new(1, 1, 0).validate(),
            Err(ConfigError::InvalidThreshold { name: "power_trustee_threshold", .. })
        ));
        let mut capped = WebPolicy::default();
        capped.max_nodes = Some(0);
        assert!(matches!(capped.validate(), Err(ConfigError::InvalidNodeLimit)));
    }

    #[test]
    fn test_signed_conversions() {
        assert_eq!(depth_from_i64(3).unwrap(), 3);
        assert!(matches!(depth_from_i64(-1), Err(ConfigError::InvalidDepth(-1))));
        assert!(threshold_from_i64("power_trustee_threshold", 0).is_err());
        assert_eq!(threshold_from_i64("power_trustee_threshold", 7).unwrap(), 7);
    }

    #[test]
    fn test_params_hash_changes() {
        let p1 = WebPolicy::default();
        let mut p2 = WebPolicy::default();
        assert_eq!(p1.params_hash(), p2.params_hash());

        p2.ignore_permission.insert(PermissionType::SendAs);
        assert_ne!(p1.params_hash(), p2.params_hash());

        // Deadline does not change the web.
        let mut p3 = WebPolicy::default();
        p3.deadline_secs = Some(5);
        assert_eq!(p1.params_hash(), p3.params_hash());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let policy: WebPolicy = serde_json::from_str(
            r#"{"max_depth": 3, "ignore_permission": ["SendAs"], "ignore_trustee": ["Admin@Contoso.com"]}"#,
        )
        .unwrap();
        assert_eq!(policy.max_depth, 3);
        assert_eq!(policy.power_trustee_threshold, 500);
        assert!(policy.ignore_permission.contains(&PermissionType::SendAs));
        assert!(policy.ignore_trustee.contains(&Identity::parse("admin@contoso.com").unwrap()));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(&path, r#"{"permissive_mailbox_threshold": 10}"#).unwrap();

        let policy = WebPolicy::from_json_file(&path).unwrap();
        assert_eq!(policy.permissive_mailbox_threshold, 10);

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(WebPolicy::from_json_file(&path), Err(ConfigError::Json(_))));
    }
}
