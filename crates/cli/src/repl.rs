//! Line-oriented REPL over the context manager.
//!
//! Input is read line by line. Dot-commands manage contexts; everything
//! else is Lua, evaluated in the current context. Input that stops short
//! of a complete chunk (an open `function`, a trailing operator) is held
//! until the chunk is complete.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use moonrepl_engine::{ContextManager, ContextRef, Error, Evaluation};
use mlua::Value;

use crate::commands::{self, Command, HELP_TEXT};

/// Whether the loop keeps going after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Repl {
    manager: ContextManager,
    contexts: Vec<ContextRef>,
    current: usize,
    pending: String,
}

impl Repl {
    /// Start with one context, the global one when `global` is set.
    pub fn new(mut manager: ContextManager, global: bool) -> Result<Self, Error> {
        let first = manager.create(global)?;
        Ok(Self {
            manager,
            contexts: vec![first],
            current: 0,
            pending: String::new(),
        })
    }

    pub fn current(&self) -> ContextRef {
        self.contexts[self.current].clone()
    }

    pub fn prompt(&self) -> String {
        if self.pending.is_empty() {
            format!("{}> ", self.current().borrow().display_name())
        } else {
            ">> ".to_string()
        }
    }

    /// Read lines until `.exit` or end of input.
    pub fn run(
        &mut self,
        input: impl BufRead,
        out: &mut dyn Write,
        err: &mut dyn Write,
        interactive: bool,
    ) -> io::Result<()> {
        let mut lines = input.lines();
        loop {
            if interactive {
                write!(out, "{}", self.prompt())?;
                out.flush()?;
            }
            let Some(line) = lines.next() else {
                break;
            };
            if self.process_line(&line?, out, err)? == Flow::Exit {
                return Ok(());
            }
        }
        // Evaluate whatever was left open at end of input.
        if !self.pending.is_empty() {
            let input = std::mem::take(&mut self.pending);
            self.evaluate(&input, out, err)?;
        }
        Ok(())
    }

    pub fn process_line(&mut self, line: &str, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<Flow> {
        if self.pending.is_empty() {
            if let Some(command) = commands::parse(line) {
                return match command {
                    Ok(command) => self.run_command(command, out, err),
                    Err(message) => {
                        writeln!(err, "{}", message)?;
                        Ok(Flow::Continue)
                    }
                };
            }
            if line.trim().is_empty() {
                return Ok(Flow::Continue);
            }
        }

        self.pending.push_str(line);
        self.pending.push('\n');
        if self.is_incomplete(&self.pending) {
            return Ok(Flow::Continue);
        }
        let input = std::mem::take(&mut self.pending);
        self.evaluate(&input, out, err)?;
        Ok(Flow::Continue)
    }

    fn is_incomplete(&self, code: &str) -> bool {
        self.manager.services().compiler.is_incomplete(code)
    }

    fn evaluate(&mut self, input: &str, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
        let evaluation = self.current().borrow_mut().eval(input.trim_end());
        print_evaluation(&evaluation, out, err)
    }

    fn switch_to(&mut self, context: ContextRef) -> usize {
        match self.contexts.iter().position(|c| Rc::ptr_eq(c, &context)) {
            Some(index) => self.current = index,
            None => {
                self.contexts.push(context);
                self.current = self.contexts.len() - 1;
            }
        }
        self.current
    }

    fn run_command(&mut self, command: Command, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<Flow> {
        match command {
            Command::Help => writeln!(out, "{}", HELP_TEXT)?,
            Command::Exit => return Ok(Flow::Exit),
            Command::New => match self.manager.create(false) {
                Ok(context) => {
                    self.switch_to(context);
                    writeln!(out, "created {}", self.current().borrow().display_name())?;
                }
                Err(e) => writeln!(err, "error: {}", e)?,
            },
            Command::Global => match self.manager.create(true) {
                Ok(context) => {
                    self.switch_to(context);
                    writeln!(out, "switched to {}", self.current().borrow().display_name())?;
                }
                Err(e) => writeln!(err, "error: {}", e)?,
            },
            Command::Fork => {
                let source = self.current();
                let forked = source.borrow().fork();
                match forked {
                    Ok(fork) => {
                        let failures = fork.errors().len();
                        let message = format!(
                            "forked {} into {}",
                            source.borrow().display_name(),
                            fork.display_name()
                        );
                        self.switch_to(Rc::new(RefCell::new(fork)));
                        writeln!(out, "{}", message)?;
                        if failures > 0 {
                            writeln!(err, "{} script(s) failed to replay; see .errors", failures)?;
                        }
                    }
                    Err(e) => writeln!(err, "error: {}", e)?,
                }
            }
            Command::Switch(name) => {
                let found = self.contexts.iter().position(|c| c.borrow().name() == name);
                match found {
                    Some(index) => {
                        self.current = index;
                        writeln!(out, "switched to {}", self.current().borrow().display_name())?;
                    }
                    None => writeln!(err, "no context named {}", name)?,
                }
            }
            Command::Name(name) => {
                let context = self.current();
                let old = context.borrow().name().to_string();
                context.borrow_mut().set_name(name);
                writeln!(out, "renamed {} to {}", old, context.borrow().display_name())?;
            }
            Command::List => {
                for (index, context) in self.contexts.iter().enumerate() {
                    let context = context.borrow();
                    let marker = if index == self.current { '*' } else { ' ' };
                    let global = if context.is_global() { " (global)" } else { "" };
                    writeln!(
                        out,
                        "{} {}{} - {} script(s)",
                        marker,
                        context.display_name(),
                        global,
                        context.scripts().len()
                    )?;
                }
            }
            Command::Entities => {
                let context = self.current();
                let context = context.borrow();
                let rendered = context
                    .get_entities()
                    .and_then(|entities| context.describe(&Value::Table(entities)));
                match rendered {
                    Ok(text) => writeln!(out, "{}", text)?,
                    Err(e) => writeln!(err, "error: {}", e)?,
                }
            }
            Command::View => {
                let evaluation = self.current().borrow_mut().view();
                print_evaluation(&evaluation, out, err)?;
            }
            Command::Load(path) => {
                let evaluation = self.current().borrow_mut().eval_file(&path);
                print_evaluation(&evaluation, out, err)?;
            }
            Command::Complete(prefix) => match self.current().borrow().complete(&prefix) {
                Ok(candidates) if candidates.is_empty() => writeln!(out, "(no completions)")?,
                Ok(candidates) => writeln!(out, "{}", candidates.join("  "))?,
                Err(e) => writeln!(err, "error: {}", e)?,
            },
            Command::Errors => {
                let context = self.current();
                let context = context.borrow();
                if context.errors().is_empty() {
                    writeln!(out, "no errors")?;
                }
                for (index, error) in context.errors().iter().enumerate() {
                    writeln!(out, "{:>3}: [{}] {}", index + 1, error.kind(), error)?;
                }
            }
            Command::History => {
                let context = self.current();
                for (index, entry) in context.borrow().history().iter().enumerate() {
                    writeln!(out, "{:>4}  {}", index + 1, entry.trim_end())?;
                }
            }
        }
        Ok(Flow::Continue)
    }
}

pub fn print_evaluation(evaluation: &Evaluation, out: &mut dyn Write, err: &mut dyn Write) -> io::Result<()> {
    for line in &evaluation.output {
        writeln!(out, "{}", line)?;
    }
    if let Some(rendered) = &evaluation.rendered {
        writeln!(out, "{}", rendered)?;
    }
    if let Some(error) = &evaluation.error {
        writeln!(err, "error: {}", error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonrepl_engine::{ContextOptions, NamePool};

    fn repl() -> Repl {
        let manager = ContextManager::new()
            .unwrap()
            .with_names(NamePool::new(vec!["Io".into(), "Europa".into()], vec![]).shared())
            .with_defaults(ContextOptions { colors: false, ..ContextOptions::default() });
        Repl::new(manager, false).unwrap()
    }

    fn feed(repl: &mut Repl, lines: &[&str]) -> (String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        for line in lines {
            repl.process_line(line, &mut out, &mut err).unwrap();
        }
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn test_multiline_input_waits_for_complete_chunk() {
        let mut repl = repl();
        let (out, err) = feed(&mut repl, &["function twice(x)", "  return x * 2", "end", "twice(4)"]);
        assert_eq!(err, "");
        assert!(out.contains("{ \"twice\" }"));
        assert!(out.ends_with("8\n"));
        assert_eq!(repl.prompt(), "Io> ");
    }

    #[test]
    fn test_fork_and_switch() {
        let mut repl = repl();
        let (out, _) = feed(&mut repl, &["n = 5", ".fork", "n = n + 1", ".switch Io", "n"]);
        assert!(out.contains("forked Io into Europa"));
        assert!(out.ends_with("5\n"));
        assert_eq!(repl.current().borrow().name(), "Io");
    }

    #[test]
    fn test_leading_dot_number_is_lua() {
        let mut repl = repl();
        let (out, err) = feed(&mut repl, &[".5 + 1"]);
        assert_eq!(err, "");
        assert_eq!(out, "1.5\n");
    }

    #[test]
    fn test_exit_stops_the_loop() {
        let mut repl = repl();
        let (mut out, mut err) = (Vec::new(), Vec::new());
        assert_eq!(repl.process_line(".exit", &mut out, &mut err).unwrap(), Flow::Exit);
    }

    #[test]
    fn test_errors_go_to_stderr_and_are_listed() {
        let mut repl = repl();
        let (out, err) = feed(&mut repl, &["error('nope')", ".errors"]);
        assert!(err.starts_with("error: "));
        assert!(out.contains("[runtime]"));
        assert!(out.contains("nope"));
    }
}
