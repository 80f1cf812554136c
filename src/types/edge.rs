//! Edge types for the relationship table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::identity::Identity;

/// Kind of permission a trustee holds on a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PermissionType {
    /// Full mailbox access.
    FullAccess,
    /// Send as the mailbox.
    SendAs,
    /// Send on behalf of the mailbox.
    SendOnBehalf,
    /// Folder permission on the mailbox root.
    MailboxRoot,
    /// Folder permission on the inbox.
    Inbox,
    /// Folder permission on the calendar.
    Calendar,
    /// Folder permission on contacts.
    Contacts,
    /// Folder permission on tasks.
    Tasks,
    /// Folder permission on sent items.
    SentItems,
}

impl PermissionType {
    /// All permission types in declaration order.
    pub const ALL: [PermissionType; 9] = [
        Self::FullAccess,
        Self::SendAs,
        Self::SendOnBehalf,
        Self::MailboxRoot,
        Self::Inbox,
        Self::Calendar,
        Self::Contacts,
        Self::Tasks,
        Self::SentItems,
    ];

    /// Normalized spellings accepted for this type, canonical first.
    ///
    /// Keys are lowercase with spaces, hyphens and underscores removed.
    pub fn keys(&self) -> &'static [&'static str] {
        match self {
            Self::FullAccess => &["fullaccess"],
            Self::SendAs => &["sendas"],
            Self::SendOnBehalf => &["sendonbehalf", "sendonbehalfof", "grantsendonbehalfto"],
            Self::MailboxRoot => &["mailboxroot", "root"],
            Self::Inbox => &["inbox"],
            Self::Calendar => &["calendar"],
            Self::Contacts => &["contacts"],
            Self::Tasks => &["tasks"],
            Self::SentItems => &["sentitems"],
        }
    }

    /// Parse a permission type, ignoring case, spaces, hyphens and underscores.
    pub fn from_str(s: &str) -> Option<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.keys().contains(&key.as_str()))
    }

    /// Canonical name, as written in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullAccess => "FullAccess",
            Self::SendAs => "SendAs",
            Self::SendOnBehalf => "SendOnBehalf",
            Self::MailboxRoot => "MailboxRoot",
            Self::Inbox => "Inbox",
            Self::Calendar => "Calendar",
            Self::Contacts => "Contacts",
            Self::Tasks => "Tasks",
            Self::SentItems => "SentItems",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split an access-rights cell (`"ReadItems, EditOwnedItems"`) into entries.
pub fn split_access_rights(cell: &str) -> impl Iterator<Item = String> + '_ {
    cell.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A single permission row before deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    /// Mailbox granting access.
    pub mailbox: Identity,
    /// Recipient type of the mailbox.
    pub mailbox_type: String,
    /// Trustee holding access.
    pub trustee: Identity,
    /// Recipient type of the trustee.
    pub trustee_type: String,
    /// Permission kind.
    pub permission_type: PermissionType,
    /// Raw access-rights cell.
    pub access_rights: String,
}

/// Deduplicated mailbox → trustee relationship.
///
/// One edge exists per (mailbox, trustee) pair. The type labels and
/// `permission_type` come from the first row seen for the pair; every
/// permission kind and access right across duplicate rows is merged into
/// `permissions` and `access_rights`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Mailbox granting access (source of forward lookups).
    pub mailbox: Identity,
    /// Recipient type of the mailbox.
    pub mailbox_type: String,
    /// Trustee holding access (source of reverse lookups).
    pub trustee: Identity,
    /// Recipient type of the trustee.
    pub trustee_type: String,
    /// Permission kind of the first-seen row.
    pub permission_type: PermissionType,
    /// All permission kinds seen for this pair.
    pub permissions: BTreeSet<PermissionType>,
    /// All access rights seen for this pair.
    pub access_rights: BTreeSet<String>,
}

impl Edge {
    /// Create an edge from its first-seen row.
    pub fn from_row(row: PermissionRow) -> Self {
        let access_rights = split_access_rights(&row.access_rights).collect();
        Self {
            mailbox: row.mailbox,
            mailbox_type: row.mailbox_type,
            trustee: row.trustee,
            trustee_type: row.trustee_type,
            permission_type: row.permission_type,
            permissions: BTreeSet::from([row.permission_type]),
            access_rights,
        }
    }

    /// Merge a duplicate row for the same pair into this edge.
    pub fn absorb(&mut self, row: &PermissionRow) {
        debug_assert_eq!(self.key(), (&row.mailbox, &row.trustee));
        self.permissions.insert(row.permission_type);
        self.access_rights.extend(split_access_rights(&row.access_rights));
    }

    /// The (mailbox, trustee) pair identifying this edge.
    pub fn key(&self) -> (&Identity, &Identity) {
        (&self.mailbox, &self.trustee)
    }

    /// Whether the edge carries a given permission kind.
    pub fn has_permission(&self, permission: PermissionType) -> bool {
        self.permissions.contains(&permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(m: &str, t: &str, p: PermissionType, rights: &str) -> PermissionRow {
        PermissionRow {
            mailbox: Identity::parse(m).unwrap(),
            mailbox_type: "UserMailbox".to_string(),
            trustee: Identity::parse(t).unwrap(),
            trustee_type: "User".to_string(),
            permission_type: p,
            access_rights: rights.to_string(),
        }
    }

    #[test]
    fn test_permission_type_parsing() {
        assert_eq!(PermissionType::from_str("FullAccess"), Some(PermissionType::FullAccess));
        assert_eq!(PermissionType::from_str("full access"), Some(PermissionType::FullAccess));
        assert_eq!(PermissionType::from_str("send_on_behalf_of"), Some(PermissionType::SendOnBehalf));
        assert_eq!(PermissionType::from_str("Sent-Items"), Some(PermissionType::SentItems));
        assert_eq!(PermissionType::from_str("Owner"), None);
    }

    #[test]
    fn test_permission_type_display_round_trips() {
        for p in PermissionType::ALL {
            assert_eq!(PermissionType::from_str(&p.to_string()), Some(p));
        }
    }

    #[test]
    fn test_absorb_merges_metadata() {
        let mut edge = Edge::from_row(row("a@x.com", "b@x.com", PermissionType::FullAccess, "FullAccess"));
        edge.absorb(&row("a@x.com", "b@x.com", PermissionType::Calendar, "ReadItems; EditOwnedItems"));

        assert_eq!(edge.permission_type, PermissionType::FullAccess);
        assert!(edge.has_permission(PermissionType::Calendar));
        assert_eq!(edge.access_rights.len(), 3);
        assert!(edge.access_rights.contains("EditOwnedItems"));
    }

    #[test]
    fn test_split_access_rights_skips_blanks() {
        let rights: Vec<_> = split_access_rights(" ReadItems,, ;CreateItems ").collect();
        assert_eq!(rights, vec!["ReadItems", "CreateItems"]);
    }
}
