#![allow(clippy::unwrap_used)]
//! End-to-end scenarios S1-S6, exercised against the decision engine,
//! node-map builder, and autofollow writer directly (no real PostgreSQL
//! required — these operate on in-memory `MemberState`/`ObservedState`
//! fixtures and a temp directory for file-based side effects).

use chrono::Utc;
use pgwarden::alerts;
use pgwarden::autofollow::{self, Outcome};
use pgwarden::decision::{DecisionEngine, Thresholds};
use pgwarden::model::{MemberState, ObservedState};
use pgwarden::node_map;
use pgwarden::pgutil::parse_connection_info;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

fn thresholds<'a>(
    never_promote: &'a HashSet<String>,
    known_gone: &'a HashSet<String>,
    maintenance_mode_file: &'a std::path::Path,
    alert_file_dir: &'a std::path::Path,
    failover_command: Option<&'a str>,
) -> Thresholds<'a> {
    Thresholds {
        warning_replication_time_lag: 30.0,
        max_failover_replication_time_lag: 120.0,
        replication_catchup_timeout: Duration::from_secs(300),
        missing_master_from_config_timeout: Duration::from_secs(15),
        failover_sleep_time: Duration::from_millis(1),
        never_promote_these_nodes: never_promote,
        known_gone_nodes: known_gone,
        maintenance_mode_file,
        alert_file_dir,
        over_warning_limit_command: None,
        failover_command,
        poll_observers_on_warning_only: false,
    }
}

/// S1: single standby, primary disappears past grace — critical lag on the
/// standby triggers the election and the standby (sole candidate) promotes.
#[tokio::test]
async fn s1_single_standby_primary_disappears_past_grace() {
    let dir = tempfile::tempdir().unwrap();
    let never_promote = HashSet::new();
    let known_gone = HashSet::new();
    let maintenance_file = dir.path().join("maintenance");
    let th = thresholds(&never_promote, &known_gone, &maintenance_file, dir.path(), Some("true"));

    let mut cluster = HashMap::new();
    cluster.insert(
        "P".to_string(),
        MemberState {
            connection: false,
            db_time: Some(Utc::now() - chrono::Duration::seconds(3600)),
            pg_is_in_recovery: Some(false),
            ..Default::default()
        },
    );
    let s_state = MemberState {
        connection: true,
        fetch_time: Utc::now(),
        pg_is_in_recovery: Some(true),
        replication_time_lag: Some(130.0),
        pg_last_xlog_receive_location: Some("1/AAAA".to_string()),
        ..Default::default()
    };
    cluster.insert("S".to_string(), s_state.clone());
    let known: HashSet<String> = cluster.keys().cloned().collect();

    let node_map = node_map::build(Some("S"), &known, &cluster, &HashMap::new(), dir.path(), Duration::from_secs(5));

    let mut engine = DecisionEngine::new();
    engine.current_master = Some("P".to_string());

    let promoted = engine.maybe_failover("S", &s_state, &node_map, &th).await;

    assert!(promoted, "S should promote: critical lag, sole candidate, quorum met");
    assert!(dir.path().join(alerts::FAILOVER_HAS_HAPPENED).exists());
}

/// S2: furthest-along standby is in `never_promote_these_nodes`, so the node
/// with the next-highest LSN (which is us) becomes the candidate instead.
#[tokio::test]
async fn s2_furthest_along_is_never_promote_node() {
    let dir = tempfile::tempdir().unwrap();
    let mut never_promote = HashSet::new();
    never_promote.insert("S2".to_string());
    let known_gone = HashSet::new();
    let maintenance_file = dir.path().join("maintenance");
    let th = thresholds(&never_promote, &known_gone, &maintenance_file, dir.path(), Some("true"));

    let mut cluster = HashMap::new();
    let s1 = MemberState {
        connection: true,
        fetch_time: Utc::now(),
        pg_is_in_recovery: Some(true),
        replication_time_lag: Some(130.0),
        pg_last_xlog_receive_location: Some("1/AAAA".to_string()),
        ..Default::default()
    };
    cluster.insert("S1".to_string(), s1.clone());
    cluster.insert(
        "S2".to_string(),
        MemberState {
            connection: true,
            fetch_time: Utc::now(),
            pg_is_in_recovery: Some(true),
            pg_last_xlog_receive_location: Some("2/AAAA".to_string()),
            ..Default::default()
        },
    );
    let known: HashSet<String> = cluster.keys().cloned().collect();

    let node_map = node_map::build(Some("S1"), &known, &cluster, &HashMap::new(), dir.path(), Duration::from_secs(5));

    let mut engine = DecisionEngine::new();
    let promoted = engine.maybe_failover("S1", &s1, &node_map, &th).await;

    assert!(promoted, "S1 should win the election once S2 is excluded by never_promote_these_nodes");
}

/// S3: identical LSNs on two standbys; every node computes the same
/// lexicographic-max winner, so only that node promotes.
#[tokio::test]
async fn s3_identical_lsns_lexicographic_tie_break() {
    let dir = tempfile::tempdir().unwrap();
    let never_promote = HashSet::new();
    let known_gone = HashSet::new();
    let maintenance_file = dir.path().join("maintenance");
    let th = thresholds(&never_promote, &known_gone, &maintenance_file, dir.path(), Some("true"));

    let mut cluster = HashMap::new();
    let s1 = MemberState {
        connection: true,
        fetch_time: Utc::now(),
        pg_is_in_recovery: Some(true),
        replication_time_lag: Some(130.0),
        pg_last_xlog_receive_location: Some("2/AAAA".to_string()),
        ..Default::default()
    };
    let s2 = MemberState {
        connection: true,
        fetch_time: Utc::now(),
        pg_is_in_recovery: Some(true),
        replication_time_lag: Some(130.0),
        pg_last_xlog_receive_location: Some("2/AAAA".to_string()),
        ..Default::default()
    };
    cluster.insert("S1".to_string(), s1.clone());
    cluster.insert("S2".to_string(), s2.clone());
    let known: HashSet<String> = cluster.keys().cloned().collect();

    let node_map_for_s1 = node_map::build(Some("S1"), &known, &cluster, &HashMap::new(), dir.path(), Duration::from_secs(5));
    let node_map_for_s2 = node_map::build(Some("S2"), &known, &cluster, &HashMap::new(), dir.path(), Duration::from_secs(5));

    let mut engine_s1 = DecisionEngine::new();
    let s1_promoted = engine_s1.maybe_failover("S1", &s1, &node_map_for_s1, &th).await;

    let dir2 = tempfile::tempdir().unwrap();
    let maintenance_file2 = dir2.path().join("maintenance");
    let th2 = thresholds(&never_promote, &known_gone, &maintenance_file2, dir2.path(), Some("true"));
    let mut engine_s2 = DecisionEngine::new();
    let s2_promoted = engine_s2.maybe_failover("S2", &s2, &node_map_for_s2, &th2).await;

    assert!(!s1_promoted, "S1 loses the lexicographic tie-break to S2");
    assert!(s2_promoted, "S2 wins the lexicographic tie-break at an identical LSN");
}

/// S4: two connected masters is split-brain — no master is resolved and the
/// `multiple_master_warning` alert fires; `current_master` is left untouched.
#[test]
fn s4_multi_master_detected() {
    let dir = tempfile::tempdir().unwrap();

    let mut cluster = HashMap::new();
    cluster.insert(
        "P1".to_string(),
        MemberState {
            connection: true,
            pg_is_in_recovery: Some(false),
            ..Default::default()
        },
    );
    cluster.insert(
        "P2".to_string(),
        MemberState {
            connection: true,
            pg_is_in_recovery: Some(false),
            ..Default::default()
        },
    );
    let known: HashSet<String> = cluster.keys().cloned().collect();

    let node_map = node_map::build(None, &known, &cluster, &HashMap::new(), dir.path(), Duration::from_secs(5));

    let mut engine = DecisionEngine::new();
    engine.current_master = Some("P1".to_string());
    engine.observe_master(&node_map);

    assert!(node_map.master_name.is_none());
    assert!(dir.path().join(alerts::MULTIPLE_MASTER_WARNING).exists());
    assert_eq!(engine.current_master.as_deref(), Some("P1"), "current_master is left unchanged on split-brain");
}

/// S5: our own probe of the master failed, but a fresh observer reports it
/// as a reachable, non-recovery primary — the node-map builder adopts that
/// view so the master is not treated as missing.
#[test]
fn s5_observer_only_view_of_master() {
    let dir = tempfile::tempdir().unwrap();

    let mut cluster = HashMap::new();
    cluster.insert(
        "M".to_string(),
        MemberState {
            connection: false,
            pg_is_in_recovery: None,
            fetch_time: Utc::now() - chrono::Duration::seconds(2),
            ..Default::default()
        },
    );
    let known: HashSet<String> = cluster.keys().cloned().collect();

    let mut observed_members = HashMap::new();
    observed_members.insert(
        "M".to_string(),
        MemberState {
            connection: true,
            pg_is_in_recovery: Some(false),
            fetch_time: Utc::now() - chrono::Duration::seconds(1),
            ..Default::default()
        },
    );
    let mut observers = HashMap::new();
    observers.insert(
        "O".to_string(),
        ObservedState {
            connection: true,
            fetch_time: Utc::now() - chrono::Duration::seconds(1),
            members: observed_members,
        },
    );

    let node_map = node_map::build(None, &known, &cluster, &observers, dir.path(), Duration::from_secs(5));

    assert_eq!(node_map.master_name.as_deref(), Some("M"));
    assert!(node_map.connected_masters.contains_key("M"));
}

/// S6: autofollow rewrites the recovery file exactly once for a genuine
/// change in `primary_conninfo`, then is a no-op on an unchanged re-run.
#[test]
fn s6_autofollow_rewrites_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("PG_VERSION"), "12").unwrap();
    std::fs::write(dir.path().join("postgresql.auto.conf"), "primary_conninfo = 'host=old port=5432'\n").unwrap();

    let new_master = parse_connection_info("host=new port=5432").unwrap();
    let outcome = autofollow::rewrite("standby1", dir.path(), "host=old port=5432 application_name=standby1", &new_master).unwrap();
    assert_eq!(outcome, Outcome::Rewritten);

    let written = std::fs::read_to_string(dir.path().join("postgresql.auto.conf")).unwrap();
    assert!(written.contains("primary_conninfo = 'host=new"));
    assert!(written.contains("recovery_target_timeline = 'latest'"));

    // A second tick with the election settled on the same master performs no rewrite.
    let outcome2 = autofollow::rewrite("standby1", dir.path(), "host=new port=5432 application_name=standby1", &new_master).unwrap();
    assert_eq!(outcome2, Outcome::Unchanged);
}
