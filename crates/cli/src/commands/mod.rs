// CLI subcommand dispatch.

use clap::Subcommand;

use crate::output::OutputFormat;

pub mod kpis;
pub mod role;
pub mod send;
pub mod suppliers;
pub mod validate;
pub mod watch;

#[derive(Subcommand)]
pub enum Command {
    /// Follow a brief live until Ctrl-C
    Watch(watch::WatchArgs),
    /// Send a chat message on a brief
    Send(send::SendArgs),
    /// Validate a proposed solution
    Validate(validate::ValidateArgs),
    /// List suppliers grouped with their products and solutions
    Suppliers(suppliers::SuppliersArgs),
    /// Show the KPI aggregate of a brief
    Kpis(kpis::KpisArgs),
    /// Show the role of the signed-in user
    Role(role::RoleArgs),
}

pub async fn run(cmd: Command, format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        Command::Watch(args) => watch::run(args, format).await,
        Command::Send(args) => send::run(args, format).await,
        Command::Validate(args) => validate::run(args, format).await,
        Command::Suppliers(args) => suppliers::run(args, format).await,
        Command::Kpis(args) => kpis::run(args, format).await,
        Command::Role(args) => role::run(args, format).await,
    }
}
