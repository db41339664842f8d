// `scout send`: post a chat message on a brief.

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde::Serialize;

use scout_common::types::{BriefId, ChatMessage};
use scout_sync::chat::is_temp_id;
use scout_sync::collection::CollectionSync;

use crate::client::CliContext;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Brief to post on.
    brief: String,
    /// Message text.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
    text: Vec<String>,
    /// Seconds to wait for the stored row when the backend answers without one.
    #[arg(long, default_value_t = 5)]
    wait: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub message: ChatMessage,
    /// The backend has not confirmed the stored row yet.
    pub pending: bool,
}

pub async fn run(args: SendArgs, format: OutputFormat) -> anyhow::Result<()> {
    let context = CliContext::load()?;
    let brief_id = BriefId::new(args.brief);
    let session = context.mount(&brief_id).await?;

    let sent = session.chat().send_message(&brief_id, &args.text.join(" ")).await;
    let sent = match sent {
        Ok(message) => {
            await_echo(session.chat().messages(), message, Duration::from_secs(args.wait)).await
        }
        Err(error) => {
            session.unmount().await;
            return Err(error).context("failed to send message");
        }
    };
    session.unmount().await;

    let result = SendResult { pending: is_temp_id(&sent.id), message: sent };
    output::print_output(format, &result, format_human)?;
    Ok(())
}

/// Wait until the temporary row has been replaced by the stored one.
async fn await_echo(
    messages: &CollectionSync<ChatMessage>,
    sent: ChatMessage,
    wait: Duration,
) -> ChatMessage {
    if !is_temp_id(&sent.id) {
        return sent;
    }
    let mut version = messages.version();
    let stored = |sent: &ChatMessage| {
        if messages.row(&sent.id).is_some() {
            return None;
        }
        messages.find(|row| !row.is_ai && !is_temp_id(&row.id) && row.content == sent.content)
    };
    let confirmed = tokio::time::timeout(wait, async {
        loop {
            if let Some(row) = stored(&sent) {
                return Some(row);
            }
            if version.changed().await.is_err() {
                return None;
            }
        }
    })
    .await;
    confirmed.ok().flatten().unwrap_or(sent)
}

fn format_human(result: &SendResult) -> String {
    let state = if result.pending { "pending" } else { "sent" };
    format!(
        "{state} [{}] {}\n  {}",
        result.message.created_at.format("%H:%M:%S"),
        result.message.id,
        result.message.content
    )
}
