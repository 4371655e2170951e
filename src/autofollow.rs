//! Autofollow Writer (component F): rewrites a standby's recovery
//! configuration to track a newly-elected primary.

use crate::pgutil::{ConnectionInfo, parse_connection_info};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Rewritten,
    Unchanged,
}

/// Picks the recovery file name for the installed PostgreSQL major version,
/// read from `PG_VERSION` in the data directory.
///
/// # Errors
///
/// Returns an error if `PG_VERSION` cannot be read or parsed.
pub fn recovery_file_name(pg_data_directory: &Path) -> Result<&'static str> {
    let raw = std::fs::read_to_string(pg_data_directory.join("PG_VERSION"))
        .context("reading PG_VERSION")?;
    let major: u32 = raw
        .trim()
        .split('.')
        .next()
        .unwrap_or(raw.trim())
        .parse()
        .with_context(|| format!("parsing PG_VERSION {raw:?}"))?;

    Ok(if major >= 12 { "postgresql.auto.conf" } else { "recovery.conf" })
}

/// Rewrites the recovery file at `pg_data_directory`/`recovery_file_name` so
/// that `primary_conninfo` points at the new master, atomically.
///
/// # Errors
///
/// Returns an error on any I/O failure reading, parsing, or rewriting the
/// recovery file. The caller should not start/stop PostgreSQL on error and
/// let the next tick retry, per the error-handling design.
pub fn rewrite(
    instance_name: &str,
    pg_data_directory: &Path,
    primary_conninfo_template: &str,
    new_master: &ConnectionInfo,
) -> Result<Outcome> {
    let file_name = recovery_file_name(pg_data_directory)?;
    let target = pg_data_directory.join(file_name);

    let existing = std::fs::read_to_string(&target).unwrap_or_default();
    let mut kept_lines = Vec::new();
    let mut old_primary_conninfo = None;
    let mut has_recovery_target_timeline = false;

    for line in existing.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("primary_conninfo") {
            old_primary_conninfo = Some(line.to_string());
            continue;
        }
        if trimmed.starts_with("recovery_target_timeline") {
            has_recovery_target_timeline = true;
        }
        kept_lines.push(line.to_string());
    }

    let mut template = parse_connection_info(primary_conninfo_template)
        .context("parsing primary_conninfo_template")?;
    if let Some(host) = new_master.get("host") {
        template.set("host", host);
    }
    if let Some(port) = new_master.get("port") {
        template.set("port", port);
    }
    let new_value = template.to_libpq_string();

    let old_value = old_primary_conninfo
        .as_deref()
        .and_then(|line| line.split_once('='))
        .map(|(_, v)| v.trim());
    let old_parsed = old_value.map(unquote_conninfo_value);

    if old_parsed.as_deref() == Some(new_value.as_str()) {
        return Ok(Outcome::Unchanged);
    }

    let mut out = String::new();
    out.push_str(&format!(
        "# pgwarden updated primary_conninfo for instance {instance_name} at {}\n",
        Utc::now().to_rfc3339()
    ));
    for line in &kept_lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&format!("primary_conninfo = '{}'\n", new_value.replace('\\', "\\\\").replace('\'', "\\'")));
    if !has_recovery_target_timeline {
        out.push_str("recovery_target_timeline = 'latest'\n");
    }

    write_atomically(&target, &out)?;

    Ok(Outcome::Rewritten)
}

fn unquote_conninfo_value(value: &str) -> String {
    let trimmed = value.trim();
    let inner = trimmed.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')).unwrap_or(trimmed);
    inner.replace("\\'", "'").replace("\\\\", "\\")
}

fn write_atomically(target: &Path, content: &str) -> Result<()> {
    let tmp: PathBuf = target.with_extension("tmp");
    std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, target).with_context(|| format!("renaming into {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn picks_auto_conf_for_pg12_and_above() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PG_VERSION"), "12").unwrap();
        assert_eq!(recovery_file_name(dir.path()).unwrap(), "postgresql.auto.conf");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn picks_recovery_conf_below_pg12() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PG_VERSION"), "9.6").unwrap();
        assert_eq!(recovery_file_name(dir.path()).unwrap(), "recovery.conf");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn rewrites_when_conninfo_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PG_VERSION"), "12").unwrap();
        fs::write(
            dir.path().join("postgresql.auto.conf"),
            "# comment\nprimary_conninfo = 'host=old port=5432'\n",
        )
        .unwrap();

        let new_master = parse_connection_info("host=new port=5432").unwrap();
        let outcome = rewrite("standby1", dir.path(), "host=old port=5432 application_name=standby1", &new_master).unwrap();
        assert_eq!(outcome, Outcome::Rewritten);

        let written = fs::read_to_string(dir.path().join("postgresql.auto.conf")).unwrap();
        assert!(written.contains("primary_conninfo = 'host=new"));
        assert!(written.contains("recovery_target_timeline = 'latest'"));
        assert!(written.contains("# comment"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn is_idempotent_when_conninfo_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("PG_VERSION"), "12").unwrap();
        fs::write(
            dir.path().join("postgresql.auto.conf"),
            "primary_conninfo = 'host=same port=5432'\nrecovery_target_timeline = 'latest'\n",
        )
        .unwrap();

        let new_master = parse_connection_info("host=same port=5432").unwrap();
        let outcome = rewrite("standby1", dir.path(), "host=same port=5432", &new_master).unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
    }
}
