// `scout validate`: move a proposed solution to validated.

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use scout_common::types::{BriefId, Solution};

use crate::client::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Brief the solution belongs to.
    brief: String,
    /// Solution to validate.
    solution: String,
    /// Also launch a fast supplier search for the solution.
    #[arg(long)]
    launch: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub solution: Solution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fast_search: Option<Value>,
}

pub async fn run(args: ValidateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let context = CliContext::load()?;
    let brief_id = BriefId::new(args.brief);
    let session = context.mount(&brief_id).await?;

    let outcome = async {
        let solution = session
            .solutions()
            .validate(&args.solution)
            .await
            .with_context(|| format!("failed to validate solution `{}`", args.solution))?;
        let fast_search = if args.launch {
            let launched = session
                .solutions()
                .launch_fast_search(&args.solution)
                .await
                .context("solution validated but fast search launch failed")?;
            Some(launched)
        } else {
            None
        };
        anyhow::Ok(ValidateResult { solution, fast_search })
    }
    .await;
    session.unmount().await;

    output::print_output(format, &outcome?, format_human)?;
    Ok(())
}

fn format_human(result: &ValidateResult) -> String {
    let mut lines = vec![format!(
        "{} [{}] {}",
        result.solution.id, result.solution.status, result.solution.title
    )];
    if result.fast_search.is_some() {
        lines.push("  fast search launched".into());
    }
    lines.join("\n")
}
