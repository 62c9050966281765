//! Decoding of oracle replies.
//!
//! Every expert prompt asks the model to reason freely and then put its
//! answer on a line that starts with `RESPONSE:`. Everything from the last
//! such marker to the end of the reply is the payload; the decoders below
//! turn that payload into one of a closed set of decisions. Anything that
//! does not fit is a [`ProtocolError`], never a guess.

use thiserror::Error;

use crate::executor::command::Command;

pub const RESPONSE_MARKER: &str = "RESPONSE:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("reply has no line starting with `RESPONSE:`")]
    MissingMarker,

    #[error("`RESPONSE:` marker is not followed by an answer")]
    EmptyPayload,

    #[error("expected {expected}, got `{got}`")]
    UnexpectedAnswer { expected: &'static str, got: String },

    #[error("expected exactly one command, got {0}")]
    AmbiguousCommand(usize),

    #[error("unrecognized command `{0}`")]
    UnknownCommand(String),

    #[error("answer list is empty")]
    EmptyList,

    #[error("instruction is conditional: `{0}`")]
    ConditionalInstruction(String),

    #[error("command targets a point outside the {width}x{height} screen: `{command}`")]
    OutOfBounds {
        command: String,
        width: u32,
        height: u32,
    },
}

/// Severity the reflection oracle assigns to a failed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Minor(String),
    Major(String),
}

/// What the action oracle decided for the current instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDecision {
    Command(Command),
    Finished,
    Error(String),
}

/// Return the payload after the last `RESPONSE:` marker.
///
/// The marker must open a line; leading whitespace and markdown emphasis
/// (`**RESPONSE:**`, `## RESPONSE:`) are tolerated.
pub fn extract_response(reply: &str) -> Result<String, ProtocolError> {
    let lines: Vec<&str> = reply.lines().collect();
    let mut found: Option<(usize, String)> = None;

    for (idx, line) in lines.iter().enumerate() {
        let stripped = line.trim_start_matches(|c: char| c.is_whitespace() || c == '*' || c == '#');
        if let Some(rest) = stripped.strip_prefix(RESPONSE_MARKER) {
            found = Some((idx, rest.trim_start_matches('*').to_string()));
        }
    }

    let (idx, first) = found.ok_or(ProtocolError::MissingMarker)?;
    let mut payload = first;
    for line in &lines[idx + 1..] {
        payload.push('\n');
        payload.push_str(line);
    }
    let payload = payload.trim().to_string();
    if payload.is_empty() {
        return Err(ProtocolError::EmptyPayload);
    }
    Ok(payload)
}

pub fn parse_yes_no(reply: &str) -> Result<bool, ProtocolError> {
    let payload = extract_response(reply)?;
    let first = payload
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match first.as_str() {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(ProtocolError::UnexpectedAnswer {
            expected: "yes or no",
            got: payload,
        }),
    }
}

/// A `;`-separated list. Items are trimmed, list numbering and bullets are
/// dropped, and empty items are skipped.
pub fn parse_list(reply: &str) -> Result<Vec<String>, ProtocolError> {
    let payload = extract_response(reply)?;
    let items: Vec<String> = payload
        .split(';')
        .map(strip_enumeration)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return Err(ProtocolError::EmptyList);
    }
    Ok(items)
}

fn strip_enumeration(item: &str) -> String {
    let item = item.trim();
    let item = item.trim_start_matches(|c: char| c == '-' || c == '*' || c == '•').trim_start();
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    let item = if digits > 0 && matches!(item[digits..].chars().next(), Some('.') | Some(')')) {
        item[digits + 1..].trim_start()
    } else {
        item
    };
    item.trim().trim_matches('"').trim().to_string()
}

/// `Minor: <diagnosis>` or `Major: <diagnosis>`, case-insensitive.
pub fn parse_verdict(reply: &str) -> Result<Severity, ProtocolError> {
    let payload = extract_response(reply)?;
    let lower = payload.to_ascii_lowercase();
    let diagnosis = |prefix_len: usize| {
        let rest = payload[prefix_len..].trim_start_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
        if rest.trim().is_empty() {
            payload.clone()
        } else {
            rest.trim().to_string()
        }
    };
    if lower.starts_with("minor") {
        Ok(Severity::Minor(diagnosis("minor".len())))
    } else if lower.starts_with("major") {
        Ok(Severity::Major(diagnosis("major".len())))
    } else {
        Err(ProtocolError::UnexpectedAnswer {
            expected: "Minor: <diagnosis> or Major: <diagnosis>",
            got: payload,
        })
    }
}

/// A single command, `FINISH`, or `ERROR: <reason>`.
pub fn parse_action(reply: &str) -> Result<ActionDecision, ProtocolError> {
    let payload = extract_response(reply)?;
    let body = strip_code_fence(&payload);
    let lower = body.to_ascii_lowercase();
    let word = lower.trim_end_matches(|c: char| c == '.' || c == '!');

    if matches!(word, "finish" | "finished" | "done") {
        return Ok(ActionDecision::Finished);
    }
    if lower.starts_with("error") {
        let reason = body["error".len()..]
            .trim_start_matches(|c: char| c == ':' || c.is_whitespace())
            .trim();
        let reason = if reason.is_empty() { "unspecified error" } else { reason };
        return Ok(ActionDecision::Error(reason.to_string()));
    }

    let mut commands = Command::parse_lines(&body)?;
    match commands.len() {
        1 => Ok(ActionDecision::Command(commands.remove(0))),
        n => Err(ProtocolError::AmbiguousCommand(n)),
    }
}

fn strip_code_fence(payload: &str) -> String {
    payload
        .lines()
        .map(str::trim)
        .filter(|l| !l.starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .trim_matches('`')
        .trim()
        .to_string()
}
