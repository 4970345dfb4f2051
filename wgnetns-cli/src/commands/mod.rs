use anyhow::Result;

use crate::cli::Commands;

pub mod interfaces;
pub mod show;
pub mod up;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Up(args) => up::execute(args).await,

        Commands::Show {
            tmpdir,
            json,
            interface,
        } => show::execute(&tmpdir, &interface, json).await,

        Commands::Interfaces { pid } => interfaces::execute(pid),
    }
}
