//! REPL (Read-Eval-Print Loop) implementation for interactive chat.

use abacus_agent::{AgentError, Conversation, format_value};
use anyhow::Result;
use console::{Style, Term, style};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};

use super::ask::print_turn;

/// REPL state and configuration.
pub struct Repl {
    conversation: Conversation,
    editor: Editor<(), DefaultHistory>,
    term: Term,
    verbose: bool,
}

impl Repl {
    /// Create a new REPL instance.
    pub fn new(conversation: Conversation, verbose: bool) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .auto_add_history(true)
            .build();

        let editor = Editor::with_config(config)?;

        Ok(Self {
            conversation,
            editor,
            term: Term::stdout(),
            verbose,
        })
    }

    /// Run the REPL loop.
    ///
    /// Planning problems are shown and the loop continues. A lost or closed
    /// session ends the loop with an error.
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        loop {
            let prompt = self.format_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();

                    if line.is_empty() {
                        continue;
                    }

                    // Handle slash commands
                    if let Some(command) = line.strip_prefix('/') {
                        match self.handle_slash_command(command) {
                            Ok(ControlFlow::Continue) => continue,
                            Ok(ControlFlow::Exit) => break,
                            Err(e) => {
                                self.print_error(&format!("Command error: {}", e));
                                continue;
                            }
                        }
                    }

                    match self.conversation.send(line).await {
                        Ok(turn) => print_turn(turn, self.verbose),
                        Err(AgentError::Planning(reason)) => self.print_error(&reason),
                        Err(e) => {
                            self.print_error(&e.to_string());
                            return Err(e.into());
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!();
                    self.print_dim("(Interrupted - type /quit to exit)");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(e) => {
                    self.print_error(&format!("Input error: {}", e));
                    break;
                }
            }
        }

        self.print_dim("Goodbye!");
        Ok(())
    }

    /// Handle a slash command (without the leading `/`).
    fn handle_slash_command(&mut self, input: &str) -> Result<ControlFlow> {
        let cmd = input.split_whitespace().next().unwrap_or("");

        match cmd {
            "quit" | "q" | "exit" => {
                return Ok(ControlFlow::Exit);
            }
            "help" | "h" | "?" => {
                self.print_help();
            }
            "clear" | "cls" => {
                self.term.clear_screen()?;
            }
            "tools" => {
                self.print_tools()?;
            }
            "history" => {
                self.print_history();
            }
            "" => {
                self.print_dim("Type /help for available commands");
            }
            _ => {
                self.print_error(&format!("Unknown command: /{}", cmd));
                self.print_dim("Type /help for available commands");
            }
        }

        Ok(ControlFlow::Continue)
    }

    fn print_welcome(&self) {
        let dim = Style::new().dim();
        println!();
        println!("{}", style("Abacus Chat").bold().cyan());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!(
            "{}",
            dim.apply_to("Ask for a calculation, e.g. \"what is 15 plus 7\".")
        );
        println!(
            "{}",
            dim.apply_to("Use /help for commands, Ctrl+D to exit.")
        );
        println!();
    }

    fn print_help(&self) {
        let dim = Style::new().dim();
        println!();
        println!("{}", style("Available Commands").bold());
        println!("{}", dim.apply_to("─".repeat(40)));
        println!("  {}  - Exit the REPL", style("/quit, /q").cyan());
        println!("  {}  - Show this help", style("/help, /h, /?").cyan());
        println!("  {}  - Clear the screen", style("/clear").cyan());
        println!("  {}  - List the server's tools", style("/tools").cyan());
        println!("  {}  - Show previous turns", style("/history").cyan());
        println!();
        println!("{}", dim.apply_to("Keyboard shortcuts:"));
        println!("  {} - Interrupt current input", dim.apply_to("Ctrl+C"));
        println!("  {} - Exit the REPL", dim.apply_to("Ctrl+D"));
        println!();
    }

    fn print_tools(&self) -> Result<()> {
        let tools = self.conversation.client().discover()?;
        for tool in &tools {
            println!("  {:<12} {}", style(&tool.name).cyan(), tool.description);
        }
        Ok(())
    }

    fn print_history(&self) {
        let history = self.conversation.history();
        if history.is_empty() {
            self.print_dim("No turns yet");
            return;
        }
        let dim = Style::new().dim();
        for turn in history {
            println!("{} {}", dim.apply_to(format!("{}.", turn.index)), turn.user_message);
            println!("   {}", turn.reply);
        }
        if let Some(value) = self.conversation.last_result() {
            println!("{}", dim.apply_to(format!("last result: {}", format_value(value))));
        }
    }

    fn format_prompt(&self) -> String {
        format!("{} ", style("abacus>").cyan().bold())
    }

    fn print_dim(&self, msg: &str) {
        let dim = Style::new().dim();
        println!("{}", dim.apply_to(msg));
    }

    fn print_error(&self, msg: &str) {
        let red = Style::new().red();
        println!("{} {}", red.apply_to("Error:"), msg);
    }
}

/// Control flow for the REPL.
pub enum ControlFlow {
    Continue,
    Exit,
}
