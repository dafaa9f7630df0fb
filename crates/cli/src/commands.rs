// REPL dot-commands

use std::path::PathBuf;

pub const HELP_TEXT: &str = "\
Commands:
  .help              Show this help
  .new               Create an isolated context and switch to it
  .global            Switch to the global context (created on first use)
  .fork              Clone the current context and switch to the clone
  .switch <name>     Switch to another context
  .name <name>       Rename the current context
  .list              List contexts
  .entities          Show user bindings of the current context
  .view              Show the whole top-level table
  .load <path>       Run a script file in the current context
  .complete <text>   List completions for a name or dotted path
  .errors            Show errors recorded in the current context
  .history           Show input history of the current context
  .exit              Leave the shell

Anything else is run as Lua. The last result is rendered after each entry,
followed by the names the entry introduced.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    New,
    Global,
    Fork,
    Switch(String),
    Name(String),
    List,
    Entities,
    View,
    Load(PathBuf),
    Complete(String),
    Errors,
    History,
    Exit,
}

/// Parse a line starting with `.` and a letter; `None` for anything else,
/// so Lua such as `.5 + 1` is left alone.
pub fn parse(line: &str) -> Option<Result<Command, String>> {
    let line = line.trim();
    let rest = line.strip_prefix('.')?;
    if !rest.starts_with(|c: char| c.is_ascii_alphabetic() || c == '?') {
        return None;
    }
    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };

    let needs = |what: &str| Err(format!(".{} needs {}", word, what));
    let command = match word {
        "help" | "h" | "?" => Ok(Command::Help),
        "new" => Ok(Command::New),
        "global" => Ok(Command::Global),
        "fork" | "clone" => Ok(Command::Fork),
        "switch" | "sw" if arg.is_empty() => needs("a context name"),
        "switch" | "sw" => Ok(Command::Switch(arg.to_string())),
        "name" if arg.is_empty() => needs("a new name"),
        "name" => Ok(Command::Name(arg.to_string())),
        "list" | "ls" => Ok(Command::List),
        "entities" => Ok(Command::Entities),
        "view" => Ok(Command::View),
        "load" if arg.is_empty() => needs("a path"),
        "load" => Ok(Command::Load(PathBuf::from(arg))),
        "complete" => Ok(Command::Complete(arg.to_string())),
        "errors" => Ok(Command::Errors),
        "history" => Ok(Command::History),
        "exit" | "quit" | "q" => Ok(Command::Exit),
        _ => Err(format!("unknown command: .{} (try .help)", word)),
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_code_is_not_a_command() {
        assert_eq!(parse("x = 1"), None);
        assert_eq!(parse("  return .5"), None);
        assert_eq!(parse(".5 + 1"), None);
        assert_eq!(parse("..."), None);
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(parse(".switch Europa"), Some(Ok(Command::Switch("Europa".into()))));
        assert_eq!(parse(".load  lib/util.lua "), Some(Ok(Command::Load("lib/util.lua".into()))));
        assert_eq!(parse(".complete string.up"), Some(Ok(Command::Complete("string.up".into()))));
        assert_eq!(parse(".complete"), Some(Ok(Command::Complete(String::new()))));
    }

    #[test]
    fn test_missing_arguments_and_unknown_commands() {
        assert!(matches!(parse(".switch"), Some(Err(msg)) if msg.contains("context name")));
        assert!(matches!(parse(".frobnicate"), Some(Err(msg)) if msg.contains("unknown command")));
    }
}
