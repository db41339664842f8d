// `scout role`: role of the signed-in user.

use clap::Args;
use serde::Serialize;

use scout_common::types::UserRole;
use scout_sync::role::fetch_user_role;

use crate::client::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RoleArgs {}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoleResult {
    pub role: UserRole,
}

pub async fn run(_args: RoleArgs, format: OutputFormat) -> anyhow::Result<()> {
    let context = CliContext::load()?;
    let backend = context.backend()?;
    let timeout = context.config.sync.role_lookup_timeout();
    let role = fetch_user_role(backend.as_ref(), timeout).await;

    output::print_output(format, &RoleResult { role }, format_human)?;
    Ok(())
}

fn format_human(result: &RoleResult) -> String {
    match result.role {
        UserRole::Admin => "admin".to_string(),
        UserRole::User => "user".to_string(),
    }
}
