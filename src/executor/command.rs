//! Low-level command vocabulary.
//!
//! Commands arrive from the action oracle as pyautogui-style code, one call per
//! line, and leave the agent as the same textual form for the environment to
//! execute. Coordinates are absolute pixels in the screenshot's space.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::llm::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Click { x: i32, y: i32 },
    DoubleClick { x: i32, y: i32 },
    RightClick { x: i32, y: i32 },
    Drag { from: (i32, i32), to: (i32, i32) },
    TypeText { text: String },
    Press { key: String },
    Hotkey { keys: Vec<String> },
    Scroll { clicks: i32 },
    Wait { seconds: f64 },
}

/// One parsed call argument.
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Str(String),
    Num(f64),
    Ident(String),
    Keyword(String, Box<Arg>),
}

/// A line either yields a full command or a `moveTo` waiting for its `dragTo`.
enum Parsed {
    Command(Command),
    MoveTo(i32, i32),
    DragTo(i32, i32),
}

fn call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<module>pyautogui|time)\.(?P<func>[A-Za-z_]+)\s*\((?P<args>.*)\)\s*;?$")
            .expect("static regex")
    })
}

impl Command {
    /// Parse every command line of an oracle payload. A `moveTo` immediately
    /// followed by a `dragTo` is folded into one `Drag`.
    pub fn parse_lines(text: &str) -> Result<Vec<Command>, ProtocolError> {
        let mut commands = Vec::new();
        let mut pending_move: Option<(i32, i32)> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match parse_line(line)? {
                Parsed::Command(cmd) => {
                    if pending_move.take().is_some() {
                        return Err(ProtocolError::UnknownCommand(
                            "pyautogui.moveTo without a following dragTo".into(),
                        ));
                    }
                    commands.push(cmd);
                }
                Parsed::MoveTo(x, y) => {
                    if pending_move.replace((x, y)).is_some() {
                        return Err(ProtocolError::UnknownCommand(
                            "pyautogui.moveTo without a following dragTo".into(),
                        ));
                    }
                }
                Parsed::DragTo(x, y) => match pending_move.take() {
                    Some(from) => commands.push(Command::Drag { from, to: (x, y) }),
                    None => {
                        return Err(ProtocolError::UnknownCommand(format!(
                            "{line} (dragTo needs a preceding moveTo)"
                        )))
                    }
                },
            }
        }

        if pending_move.is_some() {
            return Err(ProtocolError::UnknownCommand(
                "pyautogui.moveTo without a following dragTo".into(),
            ));
        }
        Ok(commands)
    }

    /// Pixel positions this command touches.
    pub fn points(&self) -> Vec<(i32, i32)> {
        match self {
            Command::Click { x, y } | Command::DoubleClick { x, y } | Command::RightClick { x, y } => {
                vec![(*x, *y)]
            }
            Command::Drag { from, to } => vec![*from, *to],
            _ => Vec::new(),
        }
    }

    /// Newline-separated pyautogui code for the environment.
    pub fn render(&self) -> String {
        match self {
            Command::Click { x, y } => format!("pyautogui.click({x}, {y})"),
            Command::DoubleClick { x, y } => format!("pyautogui.doubleClick({x}, {y})"),
            Command::RightClick { x, y } => format!("pyautogui.rightClick({x}, {y})"),
            Command::Drag { from, to } => format!(
                "pyautogui.moveTo({}, {})\npyautogui.dragTo({}, {}, duration=0.5, button='left')",
                from.0, from.1, to.0, to.1
            ),
            Command::TypeText { text } => format!("pyautogui.typewrite({})", py_str(text)),
            Command::Press { key } => format!("pyautogui.press({})", py_str(key)),
            Command::Hotkey { keys } => format!(
                "pyautogui.hotkey({})",
                keys.iter().map(|k| py_str(k)).collect::<Vec<_>>().join(", ")
            ),
            Command::Scroll { clicks } => format!("pyautogui.scroll({clicks})"),
            Command::Wait { seconds } => format!("time.sleep({seconds})"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn parse_line(line: &str) -> Result<Parsed, ProtocolError> {
    let unknown = || ProtocolError::UnknownCommand(line.to_string());
    let caps = call_re().captures(line).ok_or_else(unknown)?;
    let module = &caps["module"];
    let func = &caps["func"];
    let args = parse_args(&caps["args"]).ok_or_else(unknown)?;

    let positional: Vec<&Arg> = args.iter().filter(|a| !matches!(a, Arg::Keyword(..))).collect();
    let keyword = |name: &str| {
        args.iter().find_map(|a| match a {
            Arg::Keyword(k, v) if k == name => Some(v.as_ref()),
            _ => None,
        })
    };
    let num_at = |idx: usize, name: &str| -> Option<f64> {
        match positional.get(idx).copied().or_else(|| keyword(name)) {
            Some(Arg::Num(n)) => Some(*n),
            _ => None,
        }
    };
    let point = || -> Option<(i32, i32)> {
        Some((num_at(0, "x")?.round() as i32, num_at(1, "y")?.round() as i32))
    };
    let strings = || -> Vec<String> {
        positional
            .iter()
            .filter_map(|a| match a {
                Arg::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    };

    let parsed = match (module, func) {
        ("time", "sleep") => {
            let seconds = num_at(0, "secs").filter(|s| *s >= 0.0).ok_or_else(unknown)?;
            Parsed::Command(Command::Wait { seconds })
        }
        ("pyautogui", "click") => {
            let (x, y) = point().ok_or_else(unknown)?;
            let right = matches!(keyword("button"), Some(Arg::Str(b)) if b == "right");
            let double = matches!(keyword("clicks"), Some(Arg::Num(n)) if *n == 2.0);
            Parsed::Command(if right {
                Command::RightClick { x, y }
            } else if double {
                Command::DoubleClick { x, y }
            } else {
                Command::Click { x, y }
            })
        }
        ("pyautogui", "doubleClick") => {
            let (x, y) = point().ok_or_else(unknown)?;
            Parsed::Command(Command::DoubleClick { x, y })
        }
        ("pyautogui", "rightClick") => {
            let (x, y) = point().ok_or_else(unknown)?;
            Parsed::Command(Command::RightClick { x, y })
        }
        ("pyautogui", "moveTo") => {
            let (x, y) = point().ok_or_else(unknown)?;
            Parsed::MoveTo(x, y)
        }
        ("pyautogui", "dragTo") => {
            let (x, y) = point().ok_or_else(unknown)?;
            Parsed::DragTo(x, y)
        }
        ("pyautogui", "drag") => {
            let nums: Vec<i32> = positional
                .iter()
                .filter_map(|a| match a {
                    Arg::Num(n) => Some(n.round() as i32),
                    _ => None,
                })
                .collect();
            if nums.len() != 4 {
                return Err(unknown());
            }
            Parsed::Command(Command::Drag {
                from: (nums[0], nums[1]),
                to: (nums[2], nums[3]),
            })
        }
        ("pyautogui", "typewrite") | ("pyautogui", "write") => {
            let text = strings().into_iter().next().ok_or_else(unknown)?;
            Parsed::Command(Command::TypeText { text })
        }
        ("pyautogui", "press") => {
            let key = strings().into_iter().next().filter(|k| !k.is_empty()).ok_or_else(unknown)?;
            Parsed::Command(Command::Press { key })
        }
        ("pyautogui", "hotkey") => {
            let keys = strings();
            if keys.is_empty() || keys.iter().any(|k| k.is_empty()) {
                return Err(unknown());
            }
            Parsed::Command(Command::Hotkey { keys })
        }
        ("pyautogui", "scroll") => {
            let clicks = num_at(0, "clicks").ok_or_else(unknown)?.round() as i32;
            Parsed::Command(Command::Scroll { clicks })
        }
        _ => return Err(unknown()),
    };
    Ok(parsed)
}

/// Minimal Python call-argument reader: string literals, numbers, bare
/// identifiers and `name=value` keywords. List brackets are ignored so
/// `hotkey(['ctrl', 'c'])` reads like `hotkey('ctrl', 'c')`.
fn parse_args(src: &str) -> Option<Vec<Arg>> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() || c == ',' || c == '[' || c == ']' {
            i += 1;
            continue;
        }
        let (arg, next) = parse_value(&chars, i)?;
        i = next;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if let (Arg::Ident(name), Some('=')) = (&arg, chars.get(i)) {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            let (value, next) = parse_value(&chars, j)?;
            out.push(Arg::Keyword(name.clone(), Box::new(value)));
            i = next;
        } else {
            out.push(arg);
        }
    }
    Some(out)
}

fn parse_value(chars: &[char], start: usize) -> Option<(Arg, usize)> {
    let c = *chars.get(start)?;
    if c == '\'' || c == '"' {
        let mut s = String::new();
        let mut i = start + 1;
        while i < chars.len() {
            match chars[i] {
                '\\' => {
                    let esc = *chars.get(i + 1)?;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 2;
                }
                q if q == c => return Some((Arg::Str(s), i + 1)),
                other => {
                    s.push(other);
                    i += 1;
                }
            }
        }
        return None;
    }

    let mut end = start;
    while end < chars.len() && !matches!(chars[end], ',' | '=' | ']' | '[') && !chars[end].is_whitespace() {
        end += 1;
    }
    if end == start {
        return None;
    }
    let token: String = chars[start..end].iter().collect();
    if let Ok(n) = token.parse::<f64>() {
        if n.is_finite() {
            return Some((Arg::Num(n), end));
        }
        return None;
    }
    if token.chars().all(|ch| ch.is_alphanumeric() || ch == '_') {
        return Some((Arg::Ident(token), end));
    }
    None
}

fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}
