//! Chat command - interactive REPL mode.

use abacus_agent::{Conversation, KeywordPlanner};
use abacus_mcp::with_session;
use anyhow::Result;
use clap::Args;

use super::Context;
use super::repl::Repl;

/// Arguments for the chat command.
#[derive(Args, Debug)]
pub struct ChatArgs {}

/// Run the chat command (REPL).
///
/// Ctrl-C is handled by the line editor, so the session is not tied to the
/// interrupt signal the way one-shot commands are.
pub async fn run(_args: ChatArgs, ctx: &Context) -> Result<()> {
    let verbose = ctx.verbose;
    with_session(ctx.client_config()?, |client| async move {
        let conversation = Conversation::new(client, KeywordPlanner::new());
        let mut repl = Repl::new(conversation, verbose)?;
        repl.run().await
    })
    .await
}
