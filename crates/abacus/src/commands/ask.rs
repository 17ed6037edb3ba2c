//! Ask command - one-shot arithmetic questions.

use abacus_agent::{CallRecord, Conversation, KeywordPlanner, RecordedOutcome, Turn, format_value};
use abacus_mcp::with_session_cancellable;
use anyhow::Result;
use clap::Args;
use console::Style;

use super::{Context, interrupt_token};

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// Messages to send, one turn each, in order
    #[arg(required = true)]
    pub messages: Vec<String>,
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let dim = Style::new().dim();
    if ctx.verbose {
        eprintln!("{}", dim.apply_to(format!("Connecting to: {}", ctx.endpoint)));
    }

    let verbose = ctx.verbose;
    let json_output = ctx.json_output;
    let turns = with_session_cancellable(ctx.client_config()?, interrupt_token(), |client| async move {
        let mut conversation = Conversation::new(client, KeywordPlanner::new());
        for message in &args.messages {
            let turn = conversation.send(message).await?;
            if !json_output {
                print_turn(turn, verbose);
            }
        }
        Ok::<_, anyhow::Error>(conversation.history().to_vec())
    })
    .await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&turns)?);
    }
    Ok(())
}

/// Print a turn's reply, preceded by its calls when verbose.
pub fn print_turn(turn: &Turn, verbose: bool) {
    if verbose {
        let dim = Style::new().dim();
        for call in &turn.calls {
            println!("{}", dim.apply_to(describe_call(call)));
        }
    }
    if turn.has_failure() {
        println!("{}", Style::new().yellow().apply_to(&turn.reply));
    } else {
        println!("{}", turn.reply);
    }
}

/// `[add a=15 b=7 -> 22]`
fn describe_call(call: &CallRecord) -> String {
    let args: Vec<String> = call
        .arguments
        .iter()
        .map(|(k, v)| format!("{}={}", k, format_value(v)))
        .collect();
    let outcome = match &call.outcome {
        RecordedOutcome::Success { value } => format_value(value),
        RecordedOutcome::Error { kind, .. } => kind.to_string(),
    };
    format!("[{} {} -> {}]", call.tool_name, args.join(" "), outcome)
}
