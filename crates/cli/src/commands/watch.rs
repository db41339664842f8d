// `scout watch`: follow a brief live.
//
// Prints the mounted view once, then one line (or JSON object) per change
// until Ctrl-C. Chat and solution rows are reported as they change; supplier
// groups and KPIs are reported whole after each recompute.

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use scout_common::types::{BriefId, ChatMessage, Solution};
use scout_sync::collection::RowChange;
use scout_sync::kpi::KpiState;
use scout_sync::solutions::RefundNotice;
use scout_sync::suppliers::SupplierGroup;
use scout_sync::BriefView;

use crate::client::CliContext;
use crate::commands::{kpis, suppliers};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Brief to follow.
    brief: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeLabel {
    Inserted,
    Updated,
    Deleted,
}

/// One line of `watch` output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    Snapshot { view: BriefView },
    Message { change: ChangeLabel, message: ChatMessage },
    Solution { change: ChangeLabel, solution: Solution },
    Suppliers { groups: Vec<SupplierGroup> },
    Kpis { kpis: KpiState, changed: Vec<&'static str> },
    Refund { notice: RefundNotice },
}

pub async fn run(args: WatchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let context = CliContext::load()?;
    let brief_id = BriefId::new(args.brief);
    let session = context.mount(&brief_id).await?;

    let mut messages = session.chat().messages().changes();
    let mut solutions = session.solutions().solutions().changes();
    let mut refunds = session.solutions().refund_notices();
    let mut groups = session.suppliers().watch_groups();
    let mut kpi_state = session.kpis().subscribe();
    groups.borrow_and_update();
    kpi_state.borrow_and_update();

    emit(format, &WatchEvent::Snapshot { view: session.view().await })?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        let event = tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            change = messages.recv() => match lagged_or(change, "chat_messages")? {
                Some(change) => row_event(change).map(|(change, message)| WatchEvent::Message { change, message }),
                None => None,
            },
            change = solutions.recv() => match lagged_or(change, "solutions")? {
                Some(change) => row_event(change).map(|(change, solution)| WatchEvent::Solution { change, solution }),
                None => None,
            },
            notice = refunds.recv() => lagged_or(notice, "refunds")?.map(|notice| WatchEvent::Refund { notice }),
            changed = groups.changed() => {
                changed.context("supplier sync stopped")?;
                Some(WatchEvent::Suppliers { groups: groups.borrow_and_update().clone() })
            }
            changed = kpi_state.changed() => {
                changed.context("kpi sync stopped")?;
                let kpis = kpi_state.borrow_and_update().clone();
                (!kpis.loading).then(|| WatchEvent::Kpis { changed: kpis.changed_fields(), kpis })
            }
        };
        if let Some(event) = event {
            emit(format, &event)?;
        }
    }

    session.unmount().await;
    Ok(())
}

/// `Ok(None)` after a lag so the loop keeps going; closed streams end the watch.
fn lagged_or<T>(received: Result<T, RecvError>, stream: &str) -> anyhow::Result<Option<T>> {
    match received {
        Ok(value) => Ok(Some(value)),
        Err(RecvError::Lagged(skipped)) => {
            warn!(stream, skipped, "watch output fell behind; some changes were not printed");
            Ok(None)
        }
        Err(RecvError::Closed) => anyhow::bail!("{stream} stream closed"),
    }
}

fn row_event<T>(change: RowChange<T>) -> Option<(ChangeLabel, T)> {
    match change {
        RowChange::Inserted(row) => Some((ChangeLabel::Inserted, row)),
        RowChange::Updated { after, .. } => Some((ChangeLabel::Updated, after)),
        RowChange::Deleted(row) => Some((ChangeLabel::Deleted, row)),
        RowChange::Reloaded | RowChange::Ignored => None,
    }
}

fn emit(format: OutputFormat, event: &WatchEvent) -> anyhow::Result<()> {
    output::print_output(format, event, format_human)?;
    Ok(())
}

fn format_human(event: &WatchEvent) -> String {
    match event {
        WatchEvent::Snapshot { view } => format_view(view),
        WatchEvent::Message { change, message } => format!("{} {}", label(*change), format_message(message)),
        WatchEvent::Solution { change, solution } => {
            format!("{} solution {}", label(*change), format_solution(solution))
        }
        WatchEvent::Suppliers { groups } => {
            let mut lines = vec![format!("~ suppliers ({})", groups.len())];
            for group in groups {
                lines.extend(suppliers::format_group(group).into_iter().map(|line| format!("  {line}")));
            }
            lines.join("\n")
        }
        WatchEvent::Kpis { kpis, .. } => format!("~ kpis\n{}", indent(&kpis::format_human(kpis))),
        WatchEvent::Refund { notice } => {
            format!("! fast search refunded for \"{}\" ({})", notice.title, notice.solution_id)
        }
    }
}

fn format_view(view: &BriefView) -> String {
    let brief = view.brief_id.as_ref().map(BriefId::as_str).unwrap_or("-");
    let mut lines = vec![format!("brief {brief}")];

    lines.push(format!("messages ({})", view.messages.len()));
    lines.extend(view.messages.iter().map(|m| format!("  {}", format_message(m))));

    lines.push(format!("solutions ({})", view.solutions.len()));
    lines.extend(view.solutions.iter().map(|s| format!("  {}", format_solution(s))));

    lines.push(format!("suppliers ({})", view.supplier_groups.len()));
    for group in &view.supplier_groups {
        lines.extend(suppliers::format_group(group).into_iter().map(|line| format!("  {line}")));
    }

    lines.push("kpis".to_string());
    lines.push(indent(&kpis::format_human(&view.kpis)));

    for (entity, error) in &view.errors {
        lines.push(format!("! {entity} failed to load: {error}"));
    }
    lines.join("\n")
}

fn format_message(message: &ChatMessage) -> String {
    let author = if message.is_ai { "ai" } else { "you" };
    format!("[{}] {author}: {}", message.created_at.format("%H:%M:%S"), message.content)
}

fn format_solution(solution: &Solution) -> String {
    format!("{} [{}] {}", solution.id, solution.status, solution.title)
}

fn label(change: ChangeLabel) -> &'static str {
    match change {
        ChangeLabel::Inserted => "+",
        ChangeLabel::Updated => "~",
        ChangeLabel::Deleted => "-",
    }
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("  {line}")).collect::<Vec<_>>().join("\n")
}
