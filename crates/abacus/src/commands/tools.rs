//! Tools command - list the tools a server offers.

use abacus_mcp::{ToolDefinition, with_session};
use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::Context;

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Show parameter descriptions
    #[arg(short, long)]
    pub long: bool,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let (server, tools) = with_session(ctx.client_config()?, |client| async move {
        Ok::<_, anyhow::Error>((client.server_info().clone(), client.discover()?))
    })
    .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&tools)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!(
        "{} {}",
        style(format!("{} {}", server.name, server.version)).bold(),
        dim.apply_to(format!("({} tools)", tools.len()))
    );
    println!();

    for tool in &tools {
        println!(
            "  {:<12} {:<28} {}",
            style(&tool.name).cyan(),
            signature(tool),
            tool.description
        );
        if args.long {
            for param in &tool.parameters {
                if let Some(description) = &param.description {
                    println!(
                        "  {:<12} {}",
                        "",
                        dim.apply_to(format!("{}: {}", param.name, description))
                    );
                }
            }
        }
    }

    Ok(())
}

/// `(a: number, b: number) -> number`
fn signature(tool: &ToolDefinition) -> String {
    let params: Vec<String> = tool
        .parameters
        .iter()
        .map(|p| {
            let optional = if p.required { "" } else { "?" };
            format!("{}{}: {}", p.name, optional, p.value_type.as_str())
        })
        .collect();
    format!("({}) -> {}", params.join(", "), tool.return_type.as_str())
}
