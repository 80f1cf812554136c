//! End-to-end tests: CSV sources through table, builder and report files.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use trustee_web::report::{log_summary, EDGE_COLUMNS, NODE_COLUMNS};
use trustee_web::{
    write_edges_csv, write_nodes_csv, write_summary_json, AdjacencySource, Identity, LoadStats, PermissionType, RelationKind,
    RunSummary, SchemaError, TableLoader, WebBuilder, WebPolicy,
};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn id(s: &str) -> Identity {
    Identity::parse(s).unwrap()
}

fn loader() -> TableLoader {
    TableLoader::new()
        .with_source(fixture("full_access.csv"))
        .with_source(fixture("folder_permissions.csv"))
}

#[test]
fn test_load_concatenates_sources() {
    let table = loader().load(&WebPolicy::default()).unwrap();

    let stats = table.load_stats();
    assert_eq!(stats.raw_rows, 9);
    assert_eq!(stats.ignored_rows, 0);
    // carol -> dave appears twice (Calendar, Inbox) and collapses to one edge.
    assert_eq!(stats.deduplicated_edges, 8);
    assert_eq!(table.num_edges(), 8);

    let carol_dave = table.mailbox_edges(&id("carol@contoso.com")).next().unwrap();
    assert_eq!(carol_dave.permission_type, PermissionType::Calendar);
    assert!(carol_dave.has_permission(PermissionType::Inbox));
    assert!(carol_dave.access_rights.contains("FolderVisible"));
}

#[test]
fn test_power_trustee_excluded_from_fixture() {
    let table = loader().load(&WebPolicy::new(10, 500, 2)).unwrap();

    assert!(table.exclusions().power_trustees.contains(&id("helpdesk@contoso.com")));
    assert_eq!(table.trustee_fanout(&id("helpdesk@contoso.com")), 0);
    assert_eq!(table.num_edges(), 5);
}

#[test]
fn test_missing_columns_reported_together() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "Mailbox,Trustee,Rights").unwrap();
    writeln!(file, "a@contoso.com,b@contoso.com,FullAccess").unwrap();

    let err = TableLoader::new().with_source(&path).load(&WebPolicy::default()).unwrap_err();
    match err {
        SchemaError::MissingColumns { missing, .. } => {
            assert_eq!(missing, vec!["MailboxType", "PermissionType", "TrusteeType"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_invalid_identity_names_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad_row.csv");
    std::fs::write(
        &path,
        "MailboxIdentity,MailboxType,PermissionType,AccessRights,TrusteeIdentity,TrusteeType\n\
         a@contoso.com,UserMailbox,FullAccess,FullAccess,b@contoso.com,UserMailbox\n\
         a@contoso.com,UserMailbox,FullAccess,FullAccess,NT AUTHORITY\\SELF,User\n",
    )
    .unwrap();

    let err = TableLoader::new().with_source(&path).load(&WebPolicy::default()).unwrap_err();
    assert!(matches!(err, SchemaError::InvalidRow { line: 3, .. }), "got {err}");
}

#[test]
fn test_missing_file_is_io_error() {
    let err = TableLoader::new()
        .with_source(fixture("does_not_exist.csv"))
        .load(&WebPolicy::default())
        .unwrap_err();
    assert!(matches!(err, SchemaError::Io { .. }));
}

#[tokio::test]
async fn test_full_pipeline_writes_reports() {
    let policy = WebPolicy::new(3, 500, 500);
    let table = Arc::new(loader().load(&policy).unwrap());
    let web = WebBuilder::new(Arc::clone(&table), policy)
        .unwrap()
        .build(&[id("alice@contoso.com")])
        .await
        .unwrap();
    log_summary(web.summary());

    // alice -> carol (trustee), shared-finance (mailbox); then dave and bob.
    let order: Vec<(&str, u32, RelationKind)> = web
        .nodes()
        .iter()
        .map(|n| (n.identity.as_str(), n.depth, n.relation))
        .collect();
    assert_eq!(
        order,
        vec![
            ("alice@contoso.com", 0, RelationKind::None),
            ("carol@contoso.com", 1, RelationKind::Trustee),
            ("shared-finance@contoso.com", 1, RelationKind::Mailbox),
            ("dave@contoso.com", 2, RelationKind::Trustee),
            ("bob@contoso.com", 2, RelationKind::Trustee),
        ]
    );

    let dir = tempfile::tempdir().unwrap();
    let nodes_path = dir.path().join("nodes.csv");
    let edges_path = dir.path().join("edges.csv");
    let summary_path = dir.path().join("summary.json");

    write_nodes_csv(
        &web,
        Some(table.as_ref() as &dyn AdjacencySource),
        std::fs::File::create(&nodes_path).unwrap(),
    )
    .unwrap();
    let written = write_edges_csv(&web, &table, std::fs::File::create(&edges_path).unwrap()).unwrap();
    write_summary_json(web.summary(), std::fs::File::create(&summary_path).unwrap()).unwrap();

    let mut nodes = csv::Reader::from_path(&nodes_path).unwrap();
    let headers = nodes.headers().unwrap().clone();
    assert_eq!(&headers.iter().take(NODE_COLUMNS.len()).collect::<Vec<_>>(), &NODE_COLUMNS);
    let records: Vec<csv::StringRecord> = nodes.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), web.len());
    // shared-finance has two trustees and holds nothing.
    assert_eq!(&records[2][1], "shared-finance@contoso.com");
    assert_eq!(&records[2][6], "2");
    assert_eq!(&records[2][7], "0");

    assert_eq!(written, 4);
    let mut edges = csv::Reader::from_path(&edges_path).unwrap();
    assert_eq!(edges.headers().unwrap().iter().collect::<Vec<_>>(), EDGE_COLUMNS);
    let carol_dave = edges
        .records()
        .map(Result::unwrap)
        .find(|r| &r[0] == "carol@contoso.com")
        .unwrap();
    assert_eq!(&carol_dave[3], "Inbox;Calendar");
    assert_eq!(&carol_dave[4], "FolderVisible;ReadItems");

    let summary: RunSummary = serde_json::from_slice(&std::fs::read(&summary_path).unwrap()).unwrap();
    assert_eq!(&summary, web.summary());
    assert_eq!(summary.level_sizes, vec![1, 2, 2]);
    assert_eq!(summary.depth_reached, 2);
    assert_eq!(
        summary.load_stats,
        Some(LoadStats { raw_rows: 9, ignored_rows: 0, deduplicated_edges: 8 })
    );
}

#[tokio::test]
async fn test_policy_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    std::fs::write(
        &path,
        r#"{ "max_depth": 1, "ignore_trustee": ["carol@contoso.com"], "ignore_permission": ["SendAs"] }"#,
    )
    .unwrap();

    let policy = WebPolicy::from_json_file(&path).unwrap();
    assert_eq!(policy.power_trustee_threshold, 500);

    let table = Arc::new(loader().load(&policy).unwrap());
    assert_eq!(table.load_stats().ignored_rows, 2);

    let web = WebBuilder::new(table, policy)
        .unwrap()
        .build(&[id("alice@contoso.com")])
        .await
        .unwrap();
    let identities: Vec<&str> = web.nodes().iter().map(|n| n.identity.as_str()).collect();
    assert_eq!(identities, vec!["alice@contoso.com", "shared-finance@contoso.com"]);
}
