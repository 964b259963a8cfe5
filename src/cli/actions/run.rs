use crate::cli::actions::{server, Action};
use anyhow::Result;

// Single dispatch point for every `Action` variant.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Server(args) => server::execute(args).await,
    }
}
