use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the run action: load configuration and drive the supervisor loop
/// until a shutdown signal arrives.
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run { config_path } => crate::supervisor::run(config_path).await,
    }
}
