use anyhow::{Context, Result, bail};
use pgwarden::config::Config;
use std::path::PathBuf;
use std::time::Duration;

const MAX_STATE_FILE_AGE: Duration = Duration::from_secs(60);

fn main() {
    let Some(config_path) = std::env::args().nth(1) else {
        eprintln!("usage: pgwarden-current-master <path_to_pgwarden.json>");
        std::process::exit(1);
    };

    match current_master(&PathBuf::from(config_path)) {
        Ok(name) => {
            println!("{name}");
            std::process::exit(0);
        }
        Err(error) => {
            eprintln!("{error:#}");
            std::process::exit(1);
        }
    }
}

fn current_master(config_path: &PathBuf) -> Result<String> {
    let config = Config::load(config_path).context("loading configuration")?;

    let metadata = std::fs::metadata(&config.json_state_file_path)
        .with_context(|| format!("reading {}", config.json_state_file_path.display()))?;
    let age = metadata
        .modified()
        .context("reading state file mtime")?
        .elapsed()
        .unwrap_or(Duration::ZERO);
    if age > MAX_STATE_FILE_AGE {
        bail!("state file {} is stale ({:.0}s old)", config.json_state_file_path.display(), age.as_secs_f64());
    }

    let raw = std::fs::read_to_string(&config.json_state_file_path).context("reading state file")?;
    let state: serde_json::Value = serde_json::from_str(&raw).context("parsing state file")?;

    match state.get("current_master").and_then(serde_json::Value::as_str) {
        Some(name) => Ok(name.to_string()),
        None => bail!("no current_master in state file"),
    }
}
