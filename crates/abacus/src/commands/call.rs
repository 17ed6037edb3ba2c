//! Call command - invoke a single tool.

use abacus_agent::format_value;
use abacus_mcp::{Arguments, CallOutcome, with_session_cancellable};
use anyhow::{Result, anyhow, bail};
use clap::Args;
use console::Style;
use serde_json::{Value, json};

use super::{Context, interrupt_token};

/// Arguments for the call command.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Tool to invoke
    pub tool: String,

    /// Arguments as key=value pairs (values parsed as JSON, else taken as strings)
    #[arg(value_name = "KEY=VALUE")]
    pub args: Vec<String>,
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args)?;
    let dim = Style::new().dim();

    if ctx.verbose {
        eprintln!("{}", dim.apply_to(format!("Connecting to: {}", ctx.endpoint)));
    }

    let tool = args.tool;
    let result = with_session_cancellable(
        ctx.client_config()?,
        interrupt_token(),
        |client| async move { client.invoke_request(&tool, arguments).await },
    )
    .await?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "correlationId": result.correlation_id,
                "result": result.outcome,
            }))?
        );
    }

    match result.outcome {
        CallOutcome::Success { value } => {
            if !ctx.json_output {
                println!("{}", format_value(&value));
            }
            if ctx.verbose {
                eprintln!("{}", dim.apply_to(format!("[{}]", result.correlation_id)));
            }
            Ok(())
        }
        CallOutcome::Error {
            error_kind,
            message,
        } => Err(anyhow!("{} ({})", message, error_kind)),
    }
}

/// Parse `key=value` pairs into named arguments.
///
/// Values that parse as JSON keep their JSON type (`2` is a number, `true` a
/// boolean, `"2"` a string); anything else is passed as a plain string.
fn parse_arguments(pairs: &[String]) -> Result<Arguments> {
    let mut arguments = Arguments::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("argument '{}' is not in key=value form", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("argument '{}' has an empty name", pair);
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        if arguments.insert(key.to_string(), value).is_some() {
            bail!("argument '{}' given more than once", key);
        }
    }
    Ok(arguments)
}
