//! CSV relationship sources.
//!
//! Permission exports differ in column spelling between tools, so headers
//! are resolved against a small alias table before rows are read. Every
//! mandatory column must resolve; extra columns are ignored.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::types::{Identity, PermissionRow, PermissionType};
use super::SchemaError;

/// Mandatory relationship columns, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    /// Mailbox granting access.
    MailboxIdentity,
    /// Mailbox recipient type.
    MailboxType,
    /// Permission kind.
    PermissionType,
    /// Access rights cell.
    AccessRights,
    /// Trustee holding access.
    TrusteeIdentity,
    /// Trustee recipient type.
    TrusteeType,
}

impl Column {
    /// All mandatory columns.
    pub const ALL: [Column; 6] = [
        Self::MailboxIdentity,
        Self::MailboxType,
        Self::PermissionType,
        Self::AccessRights,
        Self::TrusteeIdentity,
        Self::TrusteeType,
    ];

    /// Canonical header name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MailboxIdentity => "MailboxIdentity",
            Self::MailboxType => "MailboxType",
            Self::PermissionType => "PermissionType",
            Self::AccessRights => "AccessRights",
            Self::TrusteeIdentity => "TrusteeIdentity",
            Self::TrusteeType => "TrusteeType",
        }
    }

    /// Resolve a header (already lowercased, separators stripped).
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "mailboxidentity" | "mailbox" | "targetmailbox" => Some(Self::MailboxIdentity),
            "mailboxtype" | "recipienttypedetails" | "mailboxrecipienttype" => Some(Self::MailboxType),
            "permissiontype" | "permission" | "permissionkind" => Some(Self::PermissionType),
            "accessrights" | "rights" => Some(Self::AccessRights),
            "trusteeidentity" | "trustee" | "trusteeprimarysmtpaddress" => Some(Self::TrusteeIdentity),
            "trusteetype" | "trusteerecipienttype" => Some(Self::TrusteeType),
            _ => None,
        }
    }
}

fn header_key(header: &str) -> String {
    header
        .trim_start_matches('\u{feff}')
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Column positions resolved from a header row.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    positions: BTreeMap<Column, usize>,
}

impl HeaderMap {
    /// Resolve mandatory columns; the first matching header wins.
    pub fn resolve<'a, I>(headers: I, source: &str) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut positions = BTreeMap::new();
        for (idx, header) in headers.into_iter().enumerate() {
            if let Some(column) = Column::from_key(&header_key(header)) {
                positions.entry(column).or_insert(idx);
            }
        }

        let missing: Vec<String> = Column::ALL
            .iter()
            .filter(|c| !positions.contains_key(c))
            .map(|c| c.name().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns {
                input: source.to_string(),
                missing,
            });
        }

        Ok(Self { positions })
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: Column) -> &'r str {
        self.positions
            .get(&column)
            .and_then(|&idx| record.get(idx))
            .unwrap_or_default()
    }
}

/// Read permission rows from a CSV reader.
///
/// `source` names the input in error messages.
pub fn read_rows<R: Read>(reader: R, source: &str) -> Result<Vec<PermissionRow>, SchemaError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| SchemaError::csv(source, e))?
        .clone();
    let map = HeaderMap::resolve(headers.iter(), source)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| SchemaError::csv(source, e))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let invalid = |message: String| SchemaError::InvalidRow {
            input: source.to_string(),
            line,
            message,
        };

        let mailbox = Identity::parse(map.get(&record, Column::MailboxIdentity))
            .map_err(|e| invalid(format!("MailboxIdentity: {e}")))?;
        let trustee = Identity::parse(map.get(&record, Column::TrusteeIdentity))
            .map_err(|e| invalid(format!("TrusteeIdentity: {e}")))?;
        let raw_permission = map.get(&record, Column::PermissionType);
        let permission_type = PermissionType::from_str(raw_permission)
            .ok_or_else(|| invalid(format!("unknown PermissionType {raw_permission:?}")))?;

        rows.push(PermissionRow {
            mailbox,
            mailbox_type: map.get(&record, Column::MailboxType).to_string(),
            trustee,
            trustee_type: map.get(&record, Column::TrusteeType).to_string(),
            permission_type,
            access_rights: map.get(&record, Column::AccessRights).to_string(),
        });
    }

    tracing::debug!(source = source, rows = rows.len(), "Read relationship source");
    Ok(rows)
}

/// Read permission rows from a CSV file.
pub fn read_rows_from_path(path: &Path) -> Result<Vec<PermissionRow>, SchemaError> {
    let source = path.display().to_string();
    let file = std::fs::File::open(path).map_err(|e| SchemaError::Io { input: source.clone(), error: e })?;
    read_rows(std::io::BufReader::new(file), &source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "\
MailboxIdentity,MailboxType,PermissionType,AccessRights,TrusteeIdentity,TrusteeType
shared@contoso.com,SharedMailbox,FullAccess,FullAccess,alice@contoso.com,UserMailbox
alice@contoso.com,UserMailbox,Calendar,\"ReadItems, EditOwnedItems\",bob@contoso.com,UserMailbox
";

    #[test]
    fn test_read_canonical_headers() {
        let rows = read_rows(CANONICAL.as_bytes(), "canonical.csv").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].mailbox.as_str(), "shared@contoso.com");
        assert_eq!(rows[0].mailbox_type, "SharedMailbox");
        assert_eq!(rows[1].permission_type, PermissionType::Calendar);
        assert_eq!(rows[1].access_rights, "ReadItems, EditOwnedItems");
    }

    #[test]
    fn test_header_variants_and_extra_columns() {
        let data = "\u{feff}Extra,Target Mailbox,Recipient_Type_Details,Permission,Rights,Trustee,Trustee Recipient Type
x,Shared@Contoso.com,SharedMailbox,Send As,,Alice@Contoso.com,UserMailbox
";
        let rows = read_rows(data.as_bytes(), "variant.csv").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mailbox.as_str(), "shared@contoso.com");
        assert_eq!(rows[0].trustee.as_str(), "alice@contoso.com");
        assert_eq!(rows[0].permission_type, PermissionType::SendAs);
    }

    #[test]
    fn test_missing_columns_are_all_reported() {
        let data = "MailboxIdentity,PermissionType,TrusteeIdentity\n";
        let err = read_rows(data.as_bytes(), "partial.csv").unwrap_err();
        match err {
            SchemaError::MissingColumns { input, missing } => {
                assert_eq!(input, "partial.csv");
                assert_eq!(missing, vec!["MailboxType", "AccessRights", "TrusteeType"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_row_reports_line() {
        let data = "\
MailboxIdentity,MailboxType,PermissionType,AccessRights,TrusteeIdentity,TrusteeType
a@contoso.com,UserMailbox,FullAccess,,b@contoso.com,User
a@contoso.com,UserMailbox,FullAccess,,NT AUTHORITY\\SELF,User
";
        let err = read_rows(data.as_bytes(), "bad.csv").unwrap_err();
        assert!(matches!(err, SchemaError::InvalidRow { line: 3, .. }), "got {err}");
    }

    #[test]
    fn test_unknown_permission_rejected() {
        let data = "\
MailboxIdentity,MailboxType,PermissionType,AccessRights,TrusteeIdentity,TrusteeType
a@contoso.com,UserMailbox,Owner,,b@contoso.com,User
";
        assert!(matches!(
            read_rows(data.as_bytes(), "perm.csv"),
            Err(SchemaError::InvalidRow { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = read_rows_from_path(Path::new("/nonexistent/relationships.csv")).unwrap_err();
        assert!(matches!(err, SchemaError::Io { .. }));
    }
}
