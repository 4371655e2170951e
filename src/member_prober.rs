//! Member Prober (component A): maintains one long-lived connection per
//! configured peer and issues the per-tick status query.

use crate::alerts;
use crate::model::MemberState;
use crate::pgutil::mask_connection_info;
use chrono::Utc;
use sqlx::{Connection, Row, postgres::PgConnection};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Server major-version boundary at which the `_wal_` function names
/// replace the legacy `_xlog_` names.
const PG_VERSION_10: i32 = 100_000;

/// Each probe's bounded wait, matching the spec's timeout contract.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MemberProber {
    connections: HashMap<String, Option<PgConnection>>,
}

impl Default for MemberProber {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberProber {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Drops connections for members no longer configured.
    pub fn reconcile_peers(&mut self, configured: &HashMap<String, String>) {
        self.connections.retain(|name, _| configured.contains_key(name));
        for name in configured.keys() {
            self.connections.entry(name.clone()).or_insert(None);
        }
    }

    #[must_use]
    pub fn configured_peer_count(&self) -> usize {
        self.connections.len()
    }

    /// Takes ownership of the stored connection (if any) so it can be driven
    /// by an independent probe future without borrowing `self`. The slot is
    /// left empty until `store` puts a result back.
    pub fn take(&mut self, name: &str) -> Option<PgConnection> {
        self.connections.get_mut(name).and_then(Option::take)
    }

    /// Stores the connection handed back by a finished probe. A no-op if the
    /// peer was removed by `reconcile_peers` while the probe was in flight.
    pub fn store(&mut self, name: &str, conn: Option<PgConnection>) {
        if let Some(slot) = self.connections.get_mut(name) {
            *slot = conn;
        }
    }

    /// Probes a single peer, returning the freshly-observed state and the
    /// connection to store back (or `None` if it was closed). Takes the
    /// connection by value so callers can run probes for distinct peers
    /// concurrently without contending for `&mut self`.
    pub async fn probe(name: &str, dsn: &str, conn: Option<PgConnection>, alert_file_dir: &Path) -> (MemberState, Option<PgConnection>) {
        let fetch_time = Utc::now();

        let mut conn = match connect_or_reuse(name, dsn, conn, alert_file_dir).await {
            Some(conn) => conn,
            None => {
                return (
                    MemberState {
                        connection: false,
                        fetch_time,
                        ..Default::default()
                    },
                    None,
                );
            }
        };

        match tokio::time::timeout(PROBE_TIMEOUT, query_member_state(&mut conn, fetch_time)).await {
            Ok(Ok(state)) => (state, Some(conn)),
            Ok(Err(error)) => {
                tracing::warn!(member = name, %error, "query error, closing connection");
                (
                    MemberState {
                        connection: false,
                        fetch_time,
                        ..Default::default()
                    },
                    None,
                )
            }
            Err(_elapsed) => {
                tracing::warn!(member = name, "probe timed out, closing connection");
                (
                    MemberState {
                        connection: false,
                        fetch_time,
                        ..Default::default()
                    },
                    None,
                )
            }
        }
    }
}

async fn connect_or_reuse(name: &str, dsn: &str, conn: Option<PgConnection>, alert_file_dir: &Path) -> Option<PgConnection> {
    if let Some(conn) = conn {
        return Some(conn);
    }

    let masked = mask_connection_info(dsn);
    tracing::info!(member = name, conninfo = %masked, "connecting");

    match tokio::time::timeout(PROBE_TIMEOUT, PgConnection::connect(dsn)).await {
        Ok(Ok(conn)) => Some(conn),
        Ok(Err(error)) => {
            tracing::warn!(member = name, %error, conninfo = %masked, "failed to connect");
            if error.to_string().contains("password authentication") {
                alerts::create(alert_file_dir, alerts::AUTHENTICATION_ERROR);
            }
            None
        }
        Err(_elapsed) => {
            tracing::warn!(member = name, conninfo = %masked, "connect timed out");
            None
        }
    }
}

async fn query_member_state(conn: &mut PgConnection, fetch_time: chrono::DateTime<Utc>) -> sqlx::Result<MemberState> {
    let version_row = sqlx::query("SHOW server_version_num").fetch_one(&mut *conn).await?;
    let version_num: String = version_row.try_get(0)?;
    let server_version: i32 = version_num.parse().unwrap_or(0);

    let status_query = status_query(server_version);
    let row = sqlx::query(status_query).fetch_one(&mut *conn).await?;

    let db_time: chrono::DateTime<Utc> = row.try_get("db_time")?;
    let pg_is_in_recovery: bool = row.try_get("pg_is_in_recovery")?;
    let pg_last_xact_replay_timestamp: Option<chrono::DateTime<Utc>> = row.try_get("pg_last_xact_replay_timestamp")?;
    let pg_last_xlog_receive_location: Option<String> = row.try_get("pg_last_xlog_receive_location")?;
    let mut pg_last_xlog_replay_location: Option<String> = row.try_get("pg_last_xlog_replay_location")?;

    if !pg_is_in_recovery {
        // Force a WAL record so the lag heartbeat advances even on an idle
        // primary, and report the primary's current WAL insert LSN in the
        // replay-location slot so primaries and standbys are comparable.
        let txn_query = updating_transaction_query(server_version);
        let master_row = sqlx::query(txn_query).fetch_one(&mut *conn).await?;
        pg_last_xlog_replay_location = master_row.try_get("pg_last_xlog_replay_location")?;
    }

    let mut state = MemberState {
        connection: true,
        fetch_time,
        db_time: Some(db_time),
        pg_is_in_recovery: Some(pg_is_in_recovery),
        pg_last_xact_replay_timestamp,
        pg_last_xlog_receive_location,
        pg_last_xlog_replay_location,
        ..Default::default()
    };

    if let Some(replay_ts) = state.pg_last_xact_replay_timestamp {
        #[allow(clippy::cast_precision_loss)]
        let lag = (db_time - replay_ts).num_milliseconds().unsigned_abs() as f64 / 1000.0;
        state.replication_time_lag = Some(lag);
    }

    if !pg_is_in_recovery {
        // These are nulled so a standby promoted to primary looks identical
        // to a node that was never a standby.
        state.pg_last_xlog_receive_location = None;
        state.pg_last_xact_replay_timestamp = None;
        state.replication_time_lag = None;
    }

    Ok(state)
}

const fn status_query(server_version: i32) -> &'static str {
    if server_version >= PG_VERSION_10 {
        "SELECT now() AS db_time, \
         pg_is_in_recovery() AS pg_is_in_recovery, \
         pg_last_xact_replay_timestamp() AS pg_last_xact_replay_timestamp, \
         pg_last_wal_receive_lsn()::text AS pg_last_xlog_receive_location, \
         pg_last_wal_replay_lsn()::text AS pg_last_xlog_replay_location"
    } else {
        "SELECT now() AS db_time, \
         pg_is_in_recovery() AS pg_is_in_recovery, \
         pg_last_xact_replay_timestamp() AS pg_last_xact_replay_timestamp, \
         pg_last_xlog_receive_location()::text AS pg_last_xlog_receive_location, \
         pg_last_xlog_replay_location()::text AS pg_last_xlog_replay_location"
    }
}

const fn updating_transaction_query(server_version: i32) -> &'static str {
    if server_version >= PG_VERSION_10 {
        "SELECT txid_current(), pg_current_wal_lsn()::text AS pg_last_xlog_replay_location"
    } else {
        "SELECT txid_current(), pg_current_xlog_location()::text AS pg_last_xlog_replay_location"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_wal_functions_for_pg10_and_above() {
        assert!(status_query(100_000).contains("pg_last_wal_receive_lsn"));
        assert!(status_query(90_600).contains("pg_last_xlog_receive_location()"));
    }

    #[test]
    fn reconcile_drops_unconfigured_peers_and_adds_new_ones() {
        let mut prober = MemberProber::new();
        let mut configured = HashMap::new();
        configured.insert("a".to_string(), "host=a".to_string());
        prober.reconcile_peers(&configured);
        assert_eq!(prober.configured_peer_count(), 1);

        configured.remove("a");
        configured.insert("b".to_string(), "host=b".to_string());
        prober.reconcile_peers(&configured);
        assert_eq!(prober.configured_peer_count(), 1);
        assert!(prober.connections.contains_key("b"));
    }
}
