//! Contexts: a named environment plus everything run inside it.
//!
//! A `Context` owns exactly one `Environment`, the output protocol bound to
//! its `_`, and the record of what ran there. Every run goes through
//! `run_script`, which brackets execution with a snapshot request so the
//! names a script introduced can be reported next to its result.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::Rc;

use mlua::{MultiValue, Table, Value};

use crate::environment::{display_value, Environment};
use crate::error::{Error, Result};
use crate::identity::{Identity, NamePool, SharedNamePool};
use crate::inspect::{Helpers, Inspect, StyleTable};
use crate::protocol::{
    HandshakeToken, OutputProtocol, Phase, Rendered, SentinelAccessor, Signal, SubMode, SENTINEL,
};
use crate::script::{Compile, FileLoader, Load, LuaCompiler, Script};

/// The bootstrap that installs the inspector helpers.
const BOOTSTRAP: &str = include_str!("inspector.lua");

/// Shared handle used for the global singleton and by the REPL.
pub type ContextRef = Rc<RefCell<Context>>;

/// Display options for a context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextOptions {
    /// Show built-in names in views and completion.
    pub builtins_visible: bool,
    /// Names left out of every view.
    pub hidden_names: BTreeSet<String>,
    /// Colorize rendered output.
    pub colors: bool,
    /// Nesting depth for inspected tables.
    pub depth: usize,
    /// Abort runs after roughly this many VM instructions.
    pub instruction_limit: Option<u64>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            builtins_visible: false,
            hidden_names: BTreeSet::new(),
            colors: true,
            depth: 2,
            instruction_limit: None,
        }
    }
}

/// Collaborators shared by every context a manager creates.
#[derive(Clone)]
pub struct Services {
    pub compiler: Rc<dyn Compile>,
    pub loader: Rc<dyn Load>,
    /// Replaces the bootstrap's `inspect` helper when set.
    pub inspector: Option<Rc<dyn Inspect>>,
    pub styles: Rc<StyleTable>,
    pub names: SharedNamePool,
    pub defaults: ContextOptions,
}

impl Services {
    pub fn new() -> Result<Self> {
        Ok(Self {
            compiler: Rc::new(LuaCompiler::new()?),
            loader: Rc::new(FileLoader::new()?),
            inspector: None,
            styles: Rc::new(StyleTable::default()),
            names: NamePool::process(),
            defaults: ContextOptions::default(),
        })
    }
}

/// Outcome of one REPL entry.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Lines printed during the run.
    pub output: Vec<String>,
    /// Rendered result; `None` when there is nothing to show.
    pub rendered: Option<String>,
    pub error: Option<Error>,
}

impl Evaluation {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct Context {
    identity: Identity,
    environment: Environment,
    protocol: Rc<RefCell<OutputProtocol>>,
    options: Rc<RefCell<ContextOptions>>,
    scripts: Vec<Script>,
    history: Vec<String>,
    errors: Vec<Error>,
    services: Services,
    global: bool,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.identity.name)
            .field("global", &self.global)
            .field("scripts", &self.scripts.len())
            .field("errors", &self.errors.len())
            .finish()
    }
}

impl Context {
    /// Bind a new context to `environment` and run the inspector bootstrap.
    pub(crate) fn new(environment: Environment, services: Services, global: bool) -> Result<Self> {
        let identity = services.names.lock().allocate();
        let options = Rc::new(RefCell::new(services.defaults.clone()));
        let protocol = Rc::new(RefCell::new(OutputProtocol::new(
            HandshakeToken::generate(),
            environment.globals(),
            environment.shared_builtins(),
            options.clone(),
            services.styles.clone(),
            services.inspector.clone(),
        )));
        environment.intercept(SENTINEL, Rc::new(SentinelAccessor::new(protocol.clone())))?;

        let context = Self {
            identity,
            environment,
            protocol,
            options,
            scripts: Vec::new(),
            history: Vec::new(),
            errors: Vec::new(),
            services,
            global,
        };
        context.bootstrap()?;
        log::info!(
            "created {} context {}",
            if global { "global" } else { "isolated" },
            context.identity.name
        );
        Ok(context)
    }

    fn bootstrap(&self) -> Result<()> {
        let script = Script::raw(BOOTSTRAP, Some("inspector"));
        self.environment.execute(&script, None)?;
        if self.protocol.borrow().phase() != Phase::Steady {
            return Err(Error::protocol("inspector bootstrap did not complete the handshake"));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The name, colored when colors are on.
    pub fn display_name(&self) -> String {
        self.identity.display(self.options.borrow().colors)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.identity.name = name.into();
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn options(&self) -> ContextOptions {
        self.options.borrow().clone()
    }

    pub fn set_options(&self, options: ContextOptions) {
        *self.options.borrow_mut() = options;
    }

    pub fn update_options(&self, update: impl FnOnce(&mut ContextOptions)) {
        update(&mut self.options.borrow_mut());
    }

    pub fn scripts(&self) -> &[Script] {
        &self.scripts
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn record_error(&mut self, error: Error) {
        log::debug!("{}: recorded {} error: {}", self.identity.name, error.kind(), error);
        self.errors.push(error);
    }

    pub fn phase(&self) -> Phase {
        self.protocol.borrow().phase()
    }

    pub fn sub_mode(&self) -> SubMode {
        self.protocol.borrow().sub_mode()
    }

    /// Drain lines printed since the last call.
    pub fn take_output(&self) -> Vec<String> {
        self.environment.take_output()
    }

    /// Compile and run `text`. Source that fails validation still runs
    /// raw, so the environment reports the error in its own terms.
    pub fn run_code(&mut self, text: &str, name: Option<&str>) -> Result<Value> {
        self.history.push(text.to_string());
        let script = match self.services.compiler.compile(text, name) {
            Ok(compiled) => Script::compiled(compiled),
            Err(e) => {
                log::debug!("{}: running raw after compile failure: {}", self.identity.name, e);
                Script::raw(text, name)
            }
        };
        self.run_script(script)
    }

    /// Load and run the script at `path`.
    pub fn run_file(&mut self, path: &Path) -> Result<Value> {
        self.history.push(path.display().to_string());
        let compiled = self.services.loader.load(path)?;
        self.run_script(Script::compiled(compiled))
    }

    /// Run `script`, returning its completion value. The names it
    /// introduced are attached to the recorded script.
    pub fn run_script(&mut self, script: Script) -> Result<Value> {
        self.scripts.push(script);
        let index = self.scripts.len() - 1;
        let outcome = self.run_recorded(index);
        self.protocol.borrow_mut().settle();
        outcome
    }

    fn run_recorded(&mut self, index: usize) -> Result<Value> {
        self.environment.reclaim_intercepted()?;
        self.protocol.borrow_mut().dispatch(Signal::RequestSnapshot)?;

        let limit = self.options.borrow().instruction_limit;
        let values = self.environment.execute(&self.scripts[index], limit)?;

        let completion = self.completion_value(values)?;
        self.environment.reclaim_intercepted()?;
        self.protocol.borrow_mut().complete_run(completion)?;

        let last = self.protocol.borrow().last().cloned();
        let (result, globals) = match last {
            Some(last) => (last.result, last.globals),
            None => (Value::Nil, None),
        };
        self.scripts[index].set_globals(globals);
        Ok(result)
    }

    fn completion_value(&self, values: MultiValue) -> Result<Value> {
        let mut values: Vec<Value> = values.into_iter().collect();
        match values.len() {
            0 => Ok(Value::Nil),
            1 => Ok(values.remove(0)),
            _ => Ok(Value::Table(self.environment.lua().create_sequence_from(values)?)),
        }
    }

    /// A new isolated context that replays every script run here.
    ///
    /// Options carry over; name, color and history do not. A replay that
    /// fails is recorded in the fork's errors and the rest still run.
    pub fn fork(&self) -> Result<Context> {
        let environment = Environment::isolated()?;
        let mut fork = Context::new(environment, self.services.clone(), false)?;
        fork.set_options(self.options());

        for script in &self.scripts {
            if let Err(e) = fork.run_script(script.clone()) {
                log::warn!(
                    "{}: replay of {} failed: {}",
                    fork.identity.name,
                    script.name().unwrap_or("input"),
                    e
                );
                fork.errors.push(e);
            }
        }
        Ok(fork)
    }

    /// User bindings: the top-level table minus built-ins and hidden names.
    pub fn get_entities(&self) -> Result<Table> {
        self.environment.reclaim_intercepted()?;
        let mut protocol = self.protocol.borrow_mut();
        protocol.dispatch(Signal::RequestFilteredView)?;
        match protocol.render(self.environment.lua())? {
            Rendered::Value(Value::Table(entities)) => Ok(entities),
            other => Err(Error::protocol(format!("filtered view produced {:?}", other))),
        }
    }

    /// Names of the current user bindings, sorted.
    pub fn entity_names(&self) -> Result<Vec<String>> {
        let entities = self.get_entities()?;
        self.helpers()?.names(&entities)
    }

    pub(crate) fn helpers(&self) -> Result<Helpers> {
        self.protocol
            .borrow()
            .helpers()
            .cloned()
            .ok_or_else(|| Error::protocol("inspector helpers are not installed"))
    }

    /// Render `value` the way results are rendered.
    pub fn describe(&self, value: &Value) -> Result<String> {
        self.protocol.borrow().describe(value)
    }

    /// The last result as displayable text.
    pub fn render(&self) -> Result<String> {
        self.environment.reclaim_intercepted()?;
        match self.protocol.borrow_mut().render(self.environment.lua())? {
            Rendered::Text(text) => Ok(text),
            Rendered::Value(value) => Ok(display_value(&value)),
        }
    }

    /// Run one line of REPL input and render the result.
    pub fn eval(&mut self, input: &str) -> Evaluation {
        self.evaluate(|context| context.run_code(input, None))
    }

    /// Run a script file and render the result.
    pub fn eval_file(&mut self, path: &Path) -> Evaluation {
        self.evaluate(|context| context.run_file(path))
    }

    /// Render the whole top-level table.
    pub fn view(&mut self) -> Evaluation {
        self.eval("_G")
    }

    fn evaluate(&mut self, run: impl FnOnce(&mut Self) -> Result<Value>) -> Evaluation {
        let outcome = run(self).and_then(|_| self.render());
        let output = self.take_output();
        match outcome {
            Ok(text) => Evaluation {
                output,
                rendered: (!text.is_empty()).then_some(text),
                error: None,
            },
            Err(e) => {
                self.record_error(e.clone());
                Evaluation { output, rendered: None, error: Some(e) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> Services {
        let mut services = Services::new().unwrap();
        services.names = NamePool::new(vec!["Io".into(), "Europa".into()], vec![]).shared();
        services.defaults.colors = false;
        services
    }

    fn context() -> Context {
        Context::new(Environment::isolated().unwrap(), services(), false).unwrap()
    }

    #[test]
    fn test_default_options() {
        let options = ContextOptions::default();
        assert!(!options.builtins_visible);
        assert!(options.colors);
        assert_eq!(options.depth, 2);
        assert_eq!(options.instruction_limit, None);
    }

    #[test]
    fn test_bootstrap_leaves_no_helpers_behind() {
        let ctx = context();
        assert_eq!(ctx.phase(), Phase::Steady);
        assert_eq!(ctx.sub_mode(), SubMode::Idle);
        let names = ctx.environment().enumerate().unwrap();
        for helper in crate::inspect::HELPER_NAMES {
            assert!(!names.contains(helper), "{helper} leaked into _G");
        }
        assert!(ctx.entity_names().unwrap().is_empty());
    }

    #[test]
    fn test_eval_renders_and_captures_prints() {
        let mut ctx = context();
        let evaluation = ctx.eval("print('hi'); answer = 42; return answer");
        assert!(evaluation.is_ok());
        assert_eq!(evaluation.output, vec!["hi"]);
        assert_eq!(evaluation.rendered.as_deref(), Some("42\n{ \"answer\" }"));
    }

    #[test]
    fn test_eval_records_errors() {
        let mut ctx = context();
        let evaluation = ctx.eval("error('boom')");
        assert!(evaluation.error.is_some());
        assert_eq!(ctx.errors().len(), 1);
        assert!(ctx.errors()[0].to_string().contains("boom"));
    }

    #[test]
    fn test_multiple_returns_become_a_sequence() {
        let mut ctx = context();
        let value = ctx.run_code("return 1, 2, 3", None).unwrap();
        let Value::Table(t) = value else { panic!("expected table") };
        assert_eq!(t.raw_len(), 3);
    }

    #[test]
    fn test_rename() {
        let mut ctx = context();
        assert_eq!(ctx.name(), "Io");
        ctx.set_name("scratch");
        assert_eq!(ctx.display_name(), "scratch");
    }
}
