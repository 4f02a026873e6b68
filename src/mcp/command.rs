//! Free-form command text to structured invocations
//!
//! Turns what a human types (`calculator expression="2+3*4"`,
//! `resource:file://current-dir`, `prompt:code-generator language=rust`)
//! into a [`ParsedCommand`] the client can execute. Parsing is pure: no I/O
//! and no dependence on what the server actually offers.
//!
//! Argument rules, in order:
//!
//! 1. No argument tokens: `{}`.
//! 2. One token wrapped in `{}` or `[]`: parsed as JSON, falling back to
//!    `{"input": token}` if that fails.
//! 3. One token containing `=`: split on commas that start a new `key=`,
//!    giving `{"key": "value", ...}`.
//! 4. One other token: `{"input": token}`.
//! 5. Several tokens: every `key=value` token becomes a field; the rest are
//!    joined with spaces into `input`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{McpError, Result};
use crate::mcp::types::{Prompt, Resource, Tool};

const RESOURCE_PREFIX: &str = "resource:";
const PROMPT_PREFIX: &str = "prompt:";
const MAX_SUGGESTIONS: usize = 10;

static KEY_START: OnceLock<Regex> = OnceLock::new();

/// Matches a `key=` at the start of a comma-separated segment.
fn key_start() -> &'static Regex {
    KEY_START.get_or_init(|| Regex::new(r"^\w+=").expect("static pattern is valid"))
}

/// What kind of invocation the caller expects the text to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Tool,
    Resource,
    Prompt,
    /// Passed through untouched.
    Custom,
}

impl From<&str> for CommandKind {
    /// Unrecognized names fall back to [`CommandKind::Tool`].
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "resource" => CommandKind::Resource,
            "prompt" => CommandKind::Prompt,
            "custom" => CommandKind::Custom,
            _ => CommandKind::Tool,
        }
    }
}

/// A structured invocation.
///
/// Serializes as `{"type": "tool", "tool": ..., "arguments": ...}`,
/// `{"type": "resource", "uri": ...}`, `{"type": "prompt", "prompt": ...,
/// "arguments": ...}`, or `{"type": "custom", "raw": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParsedCommand {
    Tool { tool: String, arguments: Value },
    Resource { uri: String },
    Prompt { prompt: String, arguments: Value },
    Custom { raw: String },
}

/// Parse `input` as a command of kind `hint`.
///
/// A leading `resource:` or `prompt:` overrides the hint.
///
/// # Errors
///
/// Returns [`McpError::CommandParse`] for empty input, an empty tool or
/// prompt name, or an empty resource URI.
///
/// # Examples
///
/// ```
/// use mcp_engine::mcp::command::{parse_command, CommandKind, ParsedCommand};
/// use serde_json::json;
///
/// let parsed = parse_command(r#"calculator expression="2+3*4""#, CommandKind::Tool).unwrap();
/// assert_eq!(
///     parsed,
///     ParsedCommand::Tool {
///         tool: "calculator".to_string(),
///         arguments: json!({ "expression": "2+3*4" }),
///     }
/// );
/// ```
pub fn parse_command(input: &str, hint: CommandKind) -> Result<ParsedCommand> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(McpError::CommandParse("command is empty".to_string()).into());
    }

    if let Some(rest) = trimmed.strip_prefix(RESOURCE_PREFIX) {
        return parse_resource(rest);
    }
    if let Some(rest) = trimmed.strip_prefix(PROMPT_PREFIX) {
        return parse_named(rest, CommandKind::Prompt);
    }

    match hint {
        CommandKind::Tool | CommandKind::Prompt => parse_named(trimmed, hint),
        CommandKind::Resource => parse_resource(trimmed),
        CommandKind::Custom => Ok(ParsedCommand::Custom {
            raw: trimmed.to_string(),
        }),
    }
}

fn parse_resource(input: &str) -> Result<ParsedCommand> {
    let uri = input.trim();
    if uri.is_empty() {
        return Err(McpError::CommandParse("resource URI is empty".to_string()).into());
    }
    Ok(ParsedCommand::Resource {
        uri: uri.to_string(),
    })
}

fn parse_named(input: &str, kind: CommandKind) -> Result<ParsedCommand> {
    let mut tokens = tokenize(input).into_iter();
    let name = tokens.next().ok_or_else(|| {
        let what = if kind == CommandKind::Prompt { "prompt" } else { "tool" };
        McpError::CommandParse(format!("{} name is empty", what))
    })?;
    let arguments = parse_arguments(&tokens.collect::<Vec<_>>())?;

    Ok(match kind {
        CommandKind::Prompt => ParsedCommand::Prompt {
            prompt: name,
            arguments,
        },
        _ => ParsedCommand::Tool {
            tool: name,
            arguments,
        },
    })
}

/// Split on spaces outside quotes. Quote characters are dropped; a quoted
/// span may sit in the middle of a token (`key="a b"`).
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == ' ' => {
                let token = current.trim();
                if !token.is_empty() {
                    tokens.push(token.to_string());
                }
                current.clear();
            }
            None => current.push(c),
        }
    }

    let token = current.trim();
    if !token.is_empty() {
        tokens.push(token.to_string());
    }
    tokens
}

fn parse_arguments(tokens: &[String]) -> Result<Value> {
    match tokens {
        [] => Ok(Value::Object(Map::new())),
        [token] => parse_single_argument(token),
        _ => {
            let mut args = Map::new();
            let mut unnamed = Vec::new();
            for token in tokens {
                if token.contains('=') {
                    if let Some((key, value)) = split_pair(token) {
                        args.insert(key, Value::String(value));
                    }
                } else {
                    unnamed.push(token.as_str());
                }
            }
            if !unnamed.is_empty() {
                args.insert("input".to_string(), Value::String(unnamed.join(" ")));
            }
            Ok(Value::Object(args))
        }
    }
}

fn parse_single_argument(token: &str) -> Result<Value> {
    let structured = (token.starts_with('{') && token.ends_with('}'))
        || (token.starts_with('[') && token.ends_with(']'));
    if structured {
        return Ok(serde_json::from_str(token).unwrap_or_else(|_| input_bag(token)));
    }

    if !token.contains('=') {
        return Ok(input_bag(token));
    }

    let key_start = key_start();
    let mut args = Map::new();
    let mut start = 0;
    for (i, _) in token.match_indices(',') {
        if key_start.is_match(&token[i + 1..]) {
            insert_pair(&mut args, &token[start..i]);
            start = i + 1;
        }
    }
    insert_pair(&mut args, &token[start..]);
    Ok(Value::Object(args))
}

fn insert_pair(args: &mut Map<String, Value>, pair: &str) {
    if let Some((key, value)) = split_pair(pair) {
        args.insert(key, Value::String(value));
    }
}

/// `key=value` on the first `=`. Pairs with an empty key are skipped.
fn split_pair(pair: &str) -> Option<(String, String)> {
    let (key, value) = pair.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key.trim().to_string(), value.trim().to_string()))
}

fn input_bag(token: &str) -> Value {
    let mut args = Map::new();
    args.insert("input".to_string(), Value::String(token.to_string()));
    Value::Object(args)
}

/// One completion candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    /// Text to insert, prefixed for resources and prompts.
    pub text: String,
    pub description: String,
}

/// Case-insensitive substring matches over tools, then resources, then
/// prompts. At most ten are returned.
pub fn generate_suggestions(
    input: &str,
    tools: &[Tool],
    resources: &[Resource],
    prompts: &[Prompt],
) -> Vec<Suggestion> {
    let needle = input.trim().to_lowercase();
    let matches = |s: &str| s.to_lowercase().contains(&needle);
    let describe = |d: &Option<String>| {
        d.clone()
            .unwrap_or_else(|| "No description".to_string())
    };

    let tools = tools.iter().filter(|t| matches(&t.name)).map(|t| Suggestion {
        kind: CommandKind::Tool,
        text: t.name.clone(),
        description: describe(&t.description),
    });
    let resources = resources
        .iter()
        .filter(|r| matches(&r.uri))
        .map(|r| Suggestion {
            kind: CommandKind::Resource,
            text: format!("{}{}", RESOURCE_PREFIX, r.uri),
            description: describe(&r.description),
        });
    let prompts = prompts.iter().filter(|p| matches(&p.name)).map(|p| Suggestion {
        kind: CommandKind::Prompt,
        text: format!("{}{}", PROMPT_PREFIX, p.name),
        description: describe(&p.description),
    });

    tools.chain(resources).chain(prompts).take(MAX_SUGGESTIONS).collect()
}
