// `scout suppliers`: grouped supplier listing for a brief.

use clap::Args;
use serde::Serialize;

use scout_common::types::BriefId;
use scout_sync::suppliers::SupplierGroup;

use crate::client::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct SuppliersArgs {
    /// Brief to list suppliers for.
    brief: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuppliersResult {
    pub brief_id: BriefId,
    pub groups: Vec<SupplierGroup>,
    /// Load errors per collection; groups may be partial when present.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<(String, String)>,
}

pub async fn run(args: SuppliersArgs, format: OutputFormat) -> anyhow::Result<()> {
    let context = CliContext::load()?;
    let brief_id = BriefId::new(args.brief);
    let session = context.mount(&brief_id).await?;
    let view = session.view().await;
    session.unmount().await;

    let errors = view
        .errors
        .into_iter()
        .filter(|(entity, _)| entity == "suppliers" || entity == "products" || entity == "solutions")
        .collect();
    let result = SuppliersResult { brief_id, groups: view.supplier_groups, errors };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

pub(crate) fn format_group(group: &SupplierGroup) -> Vec<String> {
    let mut lines = Vec::new();
    let country = group.supplier.country.as_deref().map(|c| format!(" ({c})")).unwrap_or_default();
    let score = match group.scores.best {
        Some(best) => format!("best {best:.0}"),
        None => "unscored".to_string(),
    };
    lines.push(format!(
        "{}{country}  {score}, {} product{}",
        group.supplier.company_name,
        group.total_products,
        if group.total_products == 1 { "" } else { "s" }
    ));
    for solution in &group.solutions {
        lines.push(format!("    for: {}", solution.title.as_deref().unwrap_or(&solution.id)));
    }
    for product in &group.products {
        let score = product.ai_score.map(|s| format!(" [{s:.0}]")).unwrap_or_default();
        lines.push(format!("    - {}{score}", product.product_name));
    }
    if let Some(explanation) = &group.ai_explanation {
        lines.push(format!("    why: {explanation}"));
    }
    lines
}

fn format_human(result: &SuppliersResult) -> String {
    let mut lines = Vec::new();
    if result.groups.is_empty() {
        lines.push(format!("No suppliers for brief {} yet.", result.brief_id));
    } else {
        lines.push(format!("Suppliers for brief {} ({})", result.brief_id, result.groups.len()));
        for group in &result.groups {
            lines.extend(format_group(group).into_iter().map(|line| format!("  {line}")));
        }
    }
    for (entity, error) in &result.errors {
        lines.push(format!("  ! {entity} failed to load: {error}"));
    }
    lines.join("\n")
}
