//! Sample tools, resources, and prompts served by the binary
//!
//! | Kind     | Name                 | Notes                                  |
//! |----------|----------------------|----------------------------------------|
//! | tool     | `echo`               | `text` (or `input`)                    |
//! | tool     | `calculator`         | `+ - * /` and parentheses              |
//! | tool     | `current_time`       | local and UTC time                     |
//! | tool     | `random_number`      | inclusive `min..=max`, default 1..=100 |
//! | resource | `system://info`      | JSON                                   |
//! | resource | `file://current-dir` | directory listing                      |
//! | prompt   | `code-generator`     | `language`, `task`                     |
//! | prompt   | `problem-solver`     | `problem`                              |

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use rand::Rng;
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::mcp::server::McpServer;
use crate::mcp::types::{
    GetPromptResponse, Prompt, PromptArgument, PromptMessage, Resource, ResourceContents, Role,
    Tool,
};

pub const SYSTEM_INFO_URI: &str = "system://info";
pub const CURRENT_DIR_URI: &str = "file://current-dir";

/// Register every sample entity on `server`. `root` backs
/// `file://current-dir`.
pub async fn register_demo(server: &McpServer, root: PathBuf) {
    register_tools(server).await;
    register_resources(server, root).await;
    register_prompts(server).await;
}

async fn register_tools(server: &McpServer) {
    server
        .register_tool(
            Tool::new(
                "echo",
                "Echo the input text",
                json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "Text to echo" }
                    },
                    "required": ["text"]
                }),
            ),
            |args| async move {
                let text = string_arg(&args, &["text", "input", "message"]).unwrap_or_default();
                Ok(Value::String(format!("Echo: {}", text)))
            },
        )
        .await;

    server
        .register_tool(
            Tool::new(
                "calculator",
                "Evaluate an arithmetic expression",
                json!({
                    "type": "object",
                    "properties": {
                        "expression": {
                            "type": "string",
                            "description": "Expression such as \"2+3*4\""
                        }
                    },
                    "required": ["expression"]
                }),
            ),
            |args| async move {
                let expression = string_arg(&args, &["expression", "input"])
                    .ok_or_else(|| anyhow!("missing expression"))?;
                let value = evaluate(&expression)?;
                Ok(Value::String(format!(
                    "Result: {} = {}",
                    expression,
                    format_number(value)
                )))
            },
        )
        .await;

    server
        .register_tool(
            Tool::new(
                "current_time",
                "Report the current time",
                json!({ "type": "object", "properties": {} }),
            ),
            |_| async {
                let local = chrono::Local::now();
                Ok(Value::String(format!(
                    "Current time: {} (UTC {})",
                    local.format("%Y-%m-%d %H:%M:%S %:z"),
                    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S")
                )))
            },
        )
        .await;

    server
        .register_tool(
            Tool::new(
                "random_number",
                "Generate a random integer",
                json!({
                    "type": "object",
                    "properties": {
                        "min": { "type": "number", "description": "Lower bound, default 1" },
                        "max": { "type": "number", "description": "Upper bound, default 100" }
                    }
                }),
            ),
            |args| async move {
                let min = int_arg(&args, "min")?.unwrap_or(1);
                let max = int_arg(&args, "max")?.unwrap_or(100);
                if min > max {
                    bail!("min ({}) is greater than max ({})", min, max);
                }
                let n = rand::rng().random_range(min..=max);
                Ok(Value::String(format!("Random number ({}-{}): {}", min, max, n)))
            },
        )
        .await;
}

async fn register_resources(server: &McpServer, root: PathBuf) {
    server
        .register_resource(
            Resource::new(
                SYSTEM_INFO_URI,
                "System information",
                "Basic facts about the host process",
                "application/json",
            ),
            |uri| async move {
                let info = json!({
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                    "family": std::env::consts::FAMILY,
                    "pid": std::process::id(),
                    "version": env!("CARGO_PKG_VERSION"),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                });
                let text = serde_json::to_string_pretty(&info)?;
                Ok(vec![ResourceContents::text(uri, "application/json", text)])
            },
        )
        .await;

    server
        .register_resource(
            Resource::new(
                CURRENT_DIR_URI,
                "Current directory",
                "Files in the server's working directory",
                "text/plain",
            ),
            move |uri| {
                let root = root.clone();
                async move {
                    let listing = list_directory(&root).await?;
                    Ok(vec![ResourceContents::text(uri, "text/plain", listing)])
                }
            },
        )
        .await;
}

async fn register_prompts(server: &McpServer) {
    server
        .register_prompt(
            Prompt::new(
                "code-generator",
                "Code generation assistant",
                vec![
                    PromptArgument::new("language", "Programming language", true),
                    PromptArgument::new("task", "What the code should do", true),
                ],
            ),
            |args| async move {
                let language = prompt_arg(&args, "language", "JavaScript");
                let task = prompt_arg(&args, "task", "an example function");
                Ok(GetPromptResponse {
                    description: Some(format!("Generate {} code for {}", language, task)),
                    messages: vec![PromptMessage::text(
                        Role::User,
                        format!(
                            "Write {} code that implements the following: {}\n\n\
                             Include detailed comments and follow best practices.",
                            language, task
                        ),
                    )],
                })
            },
        )
        .await;

    server
        .register_prompt(
            Prompt::new(
                "problem-solver",
                "Problem solving assistant",
                vec![PromptArgument::new("problem", "The problem to solve", true)],
            ),
            |args| async move {
                let problem = prompt_arg(&args, "problem", "a general problem");
                Ok(GetPromptResponse {
                    description: Some(format!("Analyze and solve: {}", problem)),
                    messages: vec![PromptMessage::text(
                        Role::User,
                        format!(
                            "Help me analyze and solve the following problem:\n\n{}\n\n\
                             Provide a detailed solution with steps.",
                            problem
                        ),
                    )],
                })
            },
        )
        .await;
}

/// First string-valued key out of `keys`.
fn string_arg(args: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match args.get(*k) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Integer argument given either as a JSON number or a numeric string.
fn int_arg(args: &Value, key: &str) -> Result<Option<i64>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.floor() as i64))
            .map(Some)
            .ok_or_else(|| anyhow!("{} is out of range", key)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be an integer, got {:?}", key, s)),
        Some(other) => Err(anyhow!("{} must be an integer, got {}", key, other)),
    }
}

fn prompt_arg(args: &Map<String, Value>, key: &str, default: &str) -> String {
    match args.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

async fn list_directory(root: &Path) -> Result<String> {
    let mut reader = tokio::fs::read_dir(root).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let marker = if is_dir { "[DIR]" } else { "[FILE]" };
        entries.push(format!("{} {}", marker, entry.file_name().to_string_lossy()));
    }
    entries.sort();
    Ok(entries.join("\n"))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

/// Evaluate `+ - * /` with parentheses and unary minus.
///
/// Only digits, operators, `.`, parentheses, and whitespace are accepted.
pub fn evaluate(expression: &str) -> Result<f64> {
    let cleaned: Vec<char> = expression.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        bail!("expression is empty");
    }
    if let Some(bad) = cleaned
        .iter()
        .find(|c| !(c.is_ascii_digit() || "+-*/.()".contains(**c)))
    {
        bail!(
            "unsupported character {:?}; only digits and + - * / ( ) are allowed",
            bad
        );
    }

    let mut parser = Arithmetic {
        chars: &cleaned,
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    if parser.pos != cleaned.len() {
        bail!("unexpected {:?} at position {}", cleaned[parser.pos], parser.pos);
    }
    if !value.is_finite() {
        bail!("result is not a finite number");
    }
    Ok(value)
}

/// Deepest nesting of parentheses and unary signs `evaluate` accepts.
const MAX_NESTING: usize = 256;

struct Arithmetic<'a> {
    chars: &'a [char],
    pos: usize,
    depth: usize,
}

impl Arithmetic<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expression(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' {
                if rhs == 0.0 {
                    bail!("division by zero");
                }
                value /= rhs;
            } else {
                value *= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64> {
        if self.depth >= MAX_NESTING {
            bail!("expression nested too deeply");
        }
        self.depth += 1;
        let value = self.atom();
        self.depth -= 1;
        value
    }

    fn atom(&mut self) -> Result<f64> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some('+') => {
                self.pos += 1;
                self.factor()
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(')') {
                    bail!("missing closing parenthesis");
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid number {:?}", literal))
            }
            Some(c) => Err(anyhow!("unexpected {:?} at position {}", c, self.pos)),
            None => Err(anyhow!("unexpected end of expression")),
        }
    }
}
