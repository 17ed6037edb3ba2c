//! Planner interface and a deterministic keyword planner.
//!
//! A planner reads the user's message against the discovered tool set and
//! proposes the calls to make next. The conversation driver validates and
//! issues those calls; a planner that names an unknown tool or supplies bad
//! arguments is caught by the client's local validation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use abacus_mcp::{Arguments, ToolDefinition, ValueType};

use crate::error::{AgentError, Result};

/// One call proposed by a planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedCall {
    /// Tool to invoke.
    pub tool_name: String,
    /// Named arguments.
    pub arguments: Arguments,
}

impl PlannedCall {
    /// Create a planned call.
    pub fn new(tool_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// Everything a planner may look at.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    /// Tools discovered for the current session.
    pub tools: &'a [ToolDefinition],
    /// The user's message for this turn.
    pub message: &'a str,
    /// Value produced by the most recent successful call, if any.
    pub last_result: Option<&'a Value>,
}

impl<'a> PlanContext<'a> {
    /// Look up a discovered tool.
    pub fn tool(&self, name: &str) -> Option<&'a ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }
}

/// Chooses which tools to call for a message.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Propose zero or more calls, to be issued in order.
    async fn plan(&self, context: &PlanContext<'_>) -> Result<Vec<PlannedCall>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyword planner
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    fn from_word(word: &str) -> Option<Self> {
        match word {
            "plus" | "add" | "added" | "sum" | "+" => Some(Self::Add),
            "minus" | "subtract" | "subtracted" | "-" => Some(Self::Subtract),
            "times" | "multiply" | "multiplied" | "product" | "*" => Some(Self::Multiply),
            "divided" | "divide" | "over" | "/" => Some(Self::Divide),
            _ => None,
        }
    }

    fn tool_name(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operand {
    Literal(f64),
    Previous,
}

/// Rule-based stand-in for a language-model planner.
///
/// Understands one arithmetic operation per message: `plus`/`add`,
/// `minus`/`subtract`, `times`/`multiply`, `divided`/`divide`. Operands are
/// numeric literals or a reference to the previous result (`that result`,
/// `the result`, `it`). `subtract X from Y` computes `Y - X`. A message with
/// one literal and a known previous result applies the operation to it.
#[derive(Debug, Clone, Default)]
pub struct KeywordPlanner;

impl KeywordPlanner {
    /// Create a keyword planner.
    pub fn new() -> Self {
        Self
    }

    fn parse(message: &str) -> (Option<Operation>, Vec<Operand>, bool) {
        let lowered = message.to_lowercase();
        let words: Vec<&str> = lowered
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| matches!(c, '?' | '!' | ',' | ';' | ':' | '"' | '(' | ')')))
            .map(|w| if w.len() > 1 { w.trim_end_matches('.') } else { w })
            .filter(|w| !w.is_empty())
            .collect();

        let mut operation = None;
        let mut operands = Vec::new();
        let mut reversed = false;

        let mut iter = words.iter().peekable();
        while let Some(&word) = iter.next() {
            if let Some(found) = Operation::from_word(word) {
                operation.get_or_insert(found);
                continue;
            }
            match word {
                "from" => reversed = true,
                "the" | "that" | "previous" | "last" if iter.peek().is_some_and(|next| **next == "result") => {}
                "result" | "it" | "that" => operands.push(Operand::Previous),
                other => {
                    if let Ok(n) = other.parse::<f64>() {
                        if n.is_finite() {
                            operands.push(Operand::Literal(n));
                        }
                    }
                }
            }
        }

        (operation, operands, reversed)
    }

    fn resolve(operand: Operand, value_type: ValueType, last_result: Option<&Value>) -> Result<Value> {
        match operand {
            Operand::Previous => last_result
                .cloned()
                .ok_or_else(|| AgentError::planning("there is no previous result to refer to")),
            Operand::Literal(n) if value_type == ValueType::Integer && n.fract() == 0.0 => {
                Ok(Value::from(n as i64))
            }
            Operand::Literal(n) => Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| AgentError::planning(format!("{} is not a usable number", n))),
        }
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    async fn plan(&self, context: &PlanContext<'_>) -> Result<Vec<PlannedCall>> {
        let (operation, mut operands, reversed) = Self::parse(context.message);

        let Some(operation) = operation else {
            tracing::debug!(message = %context.message, "no operation recognized");
            return Ok(Vec::new());
        };

        let Some(definition) = context.tool(operation.tool_name()) else {
            tracing::debug!(tool = operation.tool_name(), "server does not offer tool");
            return Ok(Vec::new());
        };

        if reversed && operation == Operation::Subtract {
            operands.reverse();
        }
        if operands.len() == 1 && context.last_result.is_some() {
            operands.insert(0, Operand::Previous);
        }
        if operands.len() < 2 {
            return Err(AgentError::planning(format!(
                "'{}' needs two numbers",
                operation.tool_name()
            )));
        }
        if operands.len() > 2 {
            tracing::debug!(count = operands.len(), "ignoring extra operands");
        }

        let params: Vec<_> = definition.parameters.iter().filter(|p| p.required).collect();
        if params.len() != 2 {
            return Err(AgentError::planning(format!(
                "tool '{}' does not take two operands",
                definition.name
            )));
        }

        let mut arguments = Arguments::new();
        for (param, operand) in params.iter().zip(operands) {
            let value = Self::resolve(operand, param.value_type, context.last_result)?;
            arguments.insert(param.name.clone(), value);
        }

        tracing::debug!(tool = %definition.name, "planned call");
        Ok(vec![PlannedCall::new(definition.name.clone(), arguments)])
    }
}
