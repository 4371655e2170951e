use crate::cli::actions::Action;
use anyhow::{Context, Result};
use std::path::PathBuf;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let config_path: PathBuf = matches
        .get_one::<String>("config")
        .context("missing required config path")?
        .into();

    Ok(Action::Run { config_path })
}
