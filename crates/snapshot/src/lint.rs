//! Structural lint for MQSC scripts.
//!
//! Only catches mistakes that would obviously break the apply loop:
//! unbalanced parentheses or quotes, dangling continuations, unknown
//! command verbs and files with no commands at all. Attribute names and
//! values are left to the queue manager.

use crate::Snapshot;
use crate::types::{SnapshotFile, SyntaxWarning};
use regex::Regex;
use std::sync::LazyLock;

/// Command verbs accepted by runmqsc
const KNOWN_VERBS: &[&str] = &[
    "ALTER", "ARCHIVE", "BACKUP", "CLEAR", "DEFINE", "DELETE", "DISPLAY", "PING", "PURGE",
    "RECOVER", "REFRESH", "RESET", "RESOLVE", "RESUME", "RVERIFY", "SET", "START", "STOP",
    "SUSPEND",
];

static VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)").expect("verb pattern is valid")
});

/// A single command after joining continuation lines
#[derive(Debug)]
struct Command {
    line: usize,
    text: String,
}

/// Lint every file in a snapshot
pub fn check(snapshot: &Snapshot) -> Vec<SyntaxWarning> {
    snapshot.files.iter().flat_map(check_file).collect()
}

/// Lint a single file
pub fn check_file(file: &SnapshotFile) -> Vec<SyntaxWarning> {
    let mut warnings = Vec::new();
    let warn = |line: usize, message: String| SyntaxWarning {
        file: file.name.clone(),
        line,
        message,
    };

    let (commands, dangling) = split_commands(&file.content);

    if let Some(line) = dangling {
        warnings.push(warn(line, "continuation character at end of file".to_string()));
    }

    if commands.is_empty() {
        warnings.push(warn(1, "file contains no MQSC commands".to_string()));
        return warnings;
    }

    for cmd in &commands {
        if let Some(caps) = VERB.captures(&cmd.text) {
            let verb = caps[1].to_ascii_uppercase();
            if !KNOWN_VERBS.contains(&verb.as_str()) {
                warnings.push(warn(cmd.line, format!("unknown command '{}'", &caps[1])));
            }
        } else {
            warnings.push(warn(cmd.line, "command does not start with a verb".to_string()));
        }

        match balance(&cmd.text) {
            Balance::Ok => {}
            Balance::UnterminatedQuote => {
                warnings.push(warn(cmd.line, "unterminated quoted string".to_string()));
            }
            Balance::Parens(depth) if depth > 0 => {
                warnings.push(warn(cmd.line, format!("{depth} unclosed parenthesis")));
            }
            Balance::Parens(_) => {
                warnings.push(warn(cmd.line, "unexpected ')'".to_string()));
            }
        }
    }

    warnings
}

/// Join continuation lines into commands.
///
/// Returns the commands and, when the file ends inside a continuation, the
/// line where that last command started.
fn split_commands(content: &str) -> (Vec<Command>, Option<usize>) {
    let mut commands = Vec::new();
    let mut current: Option<Command> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        if current.is_none() && (trimmed.is_empty() || trimmed.starts_with('*')) {
            continue;
        }

        let (body, continues) = match trimmed.strip_suffix(['+', '-']) {
            Some(body) => (body, true),
            None => (trimmed, false),
        };

        let cmd = current.get_or_insert_with(|| Command {
            line: line_no,
            text: String::new(),
        });
        if !cmd.text.is_empty() {
            cmd.text.push(' ');
        }
        cmd.text.push_str(body.trim_end());

        if !continues && let Some(done) = current.take() {
            commands.push(done);
        }
    }

    let dangling = current.map(|c| {
        let line = c.line;
        commands.push(c);
        line
    });
    (commands, dangling)
}

#[derive(Debug, PartialEq, Eq)]
enum Balance {
    Ok,
    UnterminatedQuote,
    /// Final depth, or -1 once a ')' closes nothing
    Parens(i32),
}

fn balance(text: &str) -> Balance {
    let mut depth = 0i32;
    let mut in_quote = false;

    for c in text.chars() {
        match c {
            // '' inside a string toggles twice and stays quoted
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    return Balance::Parens(-1);
                }
            }
            _ => {}
        }
    }

    if in_quote {
        Balance::UnterminatedQuote
    } else if depth != 0 {
        Balance::Parens(depth)
    } else {
        Balance::Ok
    }
}
