// `scout kpis`: KPI aggregate for a brief.

use anyhow::Context;
use clap::Args;

use scout_common::types::BriefId;
use scout_sync::kpi::{KpiState, KpiSync};

use crate::client::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct KpisArgs {
    /// Brief to aggregate.
    brief: String,
}

pub async fn run(args: KpisArgs, format: OutputFormat) -> anyhow::Result<()> {
    let context = CliContext::load()?;
    let brief_id = BriefId::new(args.brief);
    let kpis = KpiSync::new(context.backend()?);
    kpis.mount(brief_id.clone())
        .await
        .with_context(|| format!("failed to load KPIs for brief `{brief_id}`"))?;

    output::print_output(format, &kpis.state(), format_human)?;
    Ok(())
}

pub(crate) fn format_human(state: &KpiState) -> String {
    let Some(current) = state.current else {
        return match &state.error {
            Some(error) => format!("KPIs unavailable: {error}"),
            None => "KPIs not loaded.".to_string(),
        };
    };
    let changed = state.changed_fields();
    let mark = |field: &str| if changed.iter().any(|c| *c == field) { " *" } else { "" };
    [
        format!("solutions      {}{}", current.solutions_count, mark("solutions_count")),
        format!("suppliers      {}{}", current.suppliers_count, mark("suppliers_count")),
        format!("products       {}{}", current.products_count, mark("products_count")),
        format!("fast searches  {}{}", current.fast_searches_used, mark("fast_searches_used")),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_common::types::KpiAggregate;

    fn aggregate(solutions: u64) -> KpiAggregate {
        KpiAggregate { solutions_count: solutions, suppliers_count: 4, products_count: 9, fast_searches_used: 1 }
    }

    #[test]
    fn changed_counters_are_marked() {
        let state = KpiState {
            current: Some(aggregate(3)),
            previous: Some(aggregate(2)),
            loading: false,
            error: None,
        };
        let text = format_human(&state);
        assert!(text.contains("solutions      3 *"));
        assert!(text.contains("suppliers      4\n"));
    }

    #[test]
    fn missing_aggregate_reports_error() {
        let state = KpiState { error: Some("aggregate unavailable".into()), ..KpiState::default() };
        assert_eq!(format_human(&state), "KPIs unavailable: aggregate unavailable");
        assert_eq!(format_human(&KpiState::default()), "KPIs not loaded.");
    }
}
