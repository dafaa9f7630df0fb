//! The output protocol spoken across the sentinel binding `_`.
//!
//! # Architecture
//!
//! Code inside an environment has exactly one channel to the driver:
//! assigning to `_`. Every assignment is decoded into a `Signal` and handed
//! to `OutputProtocol::dispatch`, the only consumer. The driver emits the
//! same signals directly.
//!
//! ```text
//!   AwaitingHandshake --token--> Steady(Idle)
//!   Steady(*)         --"filter"--> Steady(FilteredView)
//!   Steady(*)         --"snapshot"--> Steady(DiffSnapshot)
//!   Steady(*)         --value--> Save(value) -> Steady(Idle)
//! ```
//!
//! Reading `_` renders the last result through the formatter the current
//! sub-mode selected. Reads never save.
//!
//! # Limitation
//!
//! A saved value equal to the token, `"filter"` or `"snapshot"` is taken as
//! a control signal and not stored.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use mlua::{Lua, Table, Value};
use uuid::Uuid;

use crate::context::ContextOptions;
use crate::environment::Accessor;
use crate::error::{Error, Result};
use crate::inspect::{Helpers, Inspect, StyleTable};

/// Name of the sentinel binding.
pub const SENTINEL: &str = "_";

/// Assigned to `_` to request the filtered binding view.
pub const FILTER_REQUEST: &str = "filter";

/// Assigned to `_` to request a binding snapshot before a run.
pub const SNAPSHOT_REQUEST: &str = "snapshot";

/// One-time value that completes the inspector handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeToken(String);

impl HandshakeToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A message crossing the sentinel boundary.
#[derive(Debug, Clone)]
pub enum Signal {
    Handshake(HandshakeToken),
    Save(Value),
    RequestFilteredView,
    RequestSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHandshake,
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubMode {
    Idle,
    FilteredView,
    DiffSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Formatter {
    Output,
    Filtered,
    Snapshot,
}

/// The value most recently saved, plus the names its run introduced.
#[derive(Debug, Clone)]
pub struct LastResult {
    pub result: Value,
    pub globals: Option<Vec<String>>,
}

/// What a read of `_` produces.
#[derive(Debug, Clone)]
pub enum Rendered {
    Text(String),
    Value(Value),
}

/// Per-context protocol state.
pub struct OutputProtocol {
    token: HandshakeToken,
    phase: Phase,
    formatter: Formatter,
    /// Names present when the pending snapshot was requested.
    baseline: Option<BTreeSet<String>>,
    /// Names present when the current run started. Unlike `baseline` it
    /// survives saves made by the script itself.
    run_baseline: Option<BTreeSet<String>>,
    /// Names present when the filtered view was requested.
    view: Option<BTreeSet<String>>,
    last: Option<LastResult>,
    helpers: Option<Helpers>,
    globals: Table,
    builtins: Rc<BTreeSet<String>>,
    options: Rc<RefCell<ContextOptions>>,
    styles: Rc<StyleTable>,
    inspector: Option<Rc<dyn Inspect>>,
}

impl OutputProtocol {
    pub fn new(
        token: HandshakeToken,
        globals: Table,
        builtins: Rc<BTreeSet<String>>,
        options: Rc<RefCell<ContextOptions>>,
        styles: Rc<StyleTable>,
        inspector: Option<Rc<dyn Inspect>>,
    ) -> Self {
        Self {
            token,
            phase: Phase::AwaitingHandshake,
            formatter: Formatter::Output,
            baseline: None,
            run_baseline: None,
            view: None,
            last: None,
            helpers: None,
            globals,
            builtins,
            options,
            styles,
            inspector,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn sub_mode(&self) -> SubMode {
        match self.formatter {
            Formatter::Filtered => SubMode::FilteredView,
            _ if self.baseline.is_some() => SubMode::DiffSnapshot,
            _ => SubMode::Idle,
        }
    }

    pub fn last(&self) -> Option<&LastResult> {
        self.last.as_ref()
    }

    pub fn helpers(&self) -> Option<&Helpers> {
        self.helpers.as_ref()
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Decode a value assigned to `_`.
    pub fn decode(&self, value: Value) -> Signal {
        if let Value::String(s) = &value {
            let text = s.to_string_lossy();
            if text == self.token.as_str() {
                return Signal::Handshake(self.token.clone());
            }
            if self.phase == Phase::Steady {
                if text == FILTER_REQUEST {
                    return Signal::RequestFilteredView;
                }
                if text == SNAPSHOT_REQUEST && self.helpers.is_some() {
                    return Signal::RequestSnapshot;
                }
            }
        }
        Signal::Save(value)
    }

    /// Handle an assignment to `_`.
    pub fn assign(&mut self, value: Value) -> Result<()> {
        let signal = self.decode(value);
        self.dispatch(signal)
    }

    /// The single consumer of protocol signals.
    pub fn dispatch(&mut self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Handshake(token) if token != self.token => {
                Err(Error::protocol("handshake with a foreign token"))
            }
            Signal::Handshake(_) => {
                if self.phase == Phase::Steady {
                    log::debug!("handshake repeated; helpers already installed");
                    return Ok(());
                }
                self.helpers = Some(Helpers::take_from(&self.globals)?);
                self.phase = Phase::Steady;
                self.formatter = Formatter::Output;
                log::debug!("inspector handshake complete");
                Ok(())
            }
            Signal::RequestFilteredView => {
                self.require_steady("filtered view")?;
                self.view = Some(self.enumerate()?);
                self.formatter = Formatter::Filtered;
                Ok(())
            }
            Signal::RequestSnapshot => {
                self.require_steady("snapshot")?;
                self.last = None;
                let names = self.enumerate()?;
                self.run_baseline = Some(names.clone());
                self.baseline = Some(names);
                self.formatter = Formatter::Snapshot;
                Ok(())
            }
            Signal::Save(value) => self.save(value),
        }
    }

    /// Hand over the completion value of a run.
    ///
    /// The value is decoded like any assignment to `_`. When it is saved,
    /// its new names are measured from the start of the run, so a value the
    /// script saved on its own along the way does not hide earlier names.
    pub fn complete_run(&mut self, completion: Value) -> Result<()> {
        self.assign(completion)?;
        if let Some(run_baseline) = self.run_baseline.take() {
            if self.last.is_some() {
                let introduced = self.introduced_since(&run_baseline)?;
                if let Some(last) = self.last.as_mut() {
                    last.globals = Some(introduced);
                }
            }
        }
        Ok(())
    }

    /// Drop any pending baseline or view and return to `Idle`.
    pub fn settle(&mut self) {
        if self.baseline.take().is_some() {
            log::debug!("dropping uncollected snapshot baseline");
        }
        self.run_baseline = None;
        self.view = None;
        self.formatter = Formatter::Output;
    }

    fn require_steady(&self, what: &str) -> Result<()> {
        if self.phase == Phase::Steady && self.helpers.is_some() {
            Ok(())
        } else {
            Err(Error::protocol(format!("{what} requested before the inspector handshake")))
        }
    }

    fn save(&mut self, value: Value) -> Result<()> {
        let globals = match self.baseline.take() {
            Some(baseline) => Some(self.introduced_since(&baseline)?),
            None => None,
        };
        self.last = Some(LastResult { result: value, globals });
        self.view = None;
        self.formatter = Formatter::Output;
        Ok(())
    }

    fn enumerate(&self) -> Result<BTreeSet<String>> {
        match &self.helpers {
            Some(helpers) => Ok(helpers.names(&self.globals)?.into_iter().collect()),
            None => Err(Error::protocol("binding enumeration needs the inspector helpers")),
        }
    }

    /// Sorted names present now that were neither in `baseline` nor built in.
    fn introduced_since(&self, baseline: &BTreeSet<String>) -> Result<Vec<String>> {
        Ok(self
            .enumerate()?
            .into_iter()
            .filter(|name| !baseline.contains(name) && !self.builtins.contains(name))
            .collect())
    }

    fn installed(&self) -> Result<&Helpers> {
        self.helpers
            .as_ref()
            .ok_or_else(|| Error::protocol("inspector helpers are not installed"))
    }

    /// Read side of `_`.
    pub fn render(&mut self, lua: &Lua) -> Result<Rendered> {
        if self.phase == Phase::AwaitingHandshake {
            return Ok(Rendered::Text(self.token.as_str().to_string()));
        }
        match self.formatter {
            Formatter::Output => Ok(Rendered::Text(self.output(lua)?)),
            Formatter::Filtered => {
                self.formatter = Formatter::Output;
                let view = self.view.take();
                Ok(Rendered::Value(Value::Table(self.entities(view.as_ref())?)))
            }
            Formatter::Snapshot => {
                self.formatter = Formatter::Output;
                let names = match &self.baseline {
                    Some(baseline) => self.introduced_since(baseline)?,
                    None => Vec::new(),
                };
                Ok(Rendered::Value(Value::Table(lua.create_sequence_from(names)?)))
            }
        }
    }

    /// User bindings: everything except built-ins, hidden names, and names
    /// created after `view` was captured.
    fn entities(&self, view: Option<&BTreeSet<String>>) -> Result<Table> {
        let helpers = self.installed()?;
        let mut excluded: BTreeSet<String> = self.builtins.iter().cloned().collect();
        excluded.extend(self.options.borrow().hidden_names.iter().cloned());
        if let Some(view) = view {
            excluded.extend(self.enumerate()?.into_iter().filter(|n| !view.contains(n)));
        }
        helpers.filter(&self.globals, &excluded, false)
    }

    /// Render any value with the context's current options.
    pub fn describe(&self, value: &Value) -> Result<String> {
        let options = self.options.borrow().clone();
        self.inspect(value, &options)
    }

    fn inspect(&self, value: &Value, options: &ContextOptions) -> Result<String> {
        match &self.inspector {
            Some(custom) => custom.inspect(value, options, &self.styles),
            None => self.installed()?.inspect(value, options, &self.styles),
        }
    }

    /// The `output` formatter: the result, then the names it introduced.
    fn output(&self, lua: &Lua) -> Result<String> {
        let Some(last) = &self.last else {
            return Ok(String::new());
        };
        let options = self.options.borrow().clone();

        let mut value = last.result.clone();
        if !options.builtins_visible {
            if let Value::Table(t) = &value {
                if t.to_pointer() == self.globals.to_pointer() {
                    value = Value::Table(self.installed()?.filter(t, &self.builtins, false)?);
                }
            }
        }

        let mut lines = Vec::new();
        if !value.is_nil() {
            lines.push(self.inspect(&value, &options)?);
        }
        if let Some(globals) = last.globals.as_ref().filter(|g| !g.is_empty()) {
            let list = Value::Table(lua.create_sequence_from(globals.iter().map(String::as_str))?);
            lines.push(self.inspect(&list, &options)?);
        }
        Ok(lines.join("\n"))
    }
}

/// Routes reads and writes of `_` to the protocol.
pub(crate) struct SentinelAccessor {
    protocol: Rc<RefCell<OutputProtocol>>,
}

impl SentinelAccessor {
    pub(crate) fn new(protocol: Rc<RefCell<OutputProtocol>>) -> Self {
        Self { protocol }
    }

    fn busy() -> mlua::Error {
        mlua::Error::RuntimeError("output protocol is busy".to_string())
    }
}

impl Accessor for SentinelAccessor {
    fn get(&self, lua: &Lua) -> mlua::Result<Value> {
        let mut protocol = self.protocol.try_borrow_mut().map_err(|_| Self::busy())?;
        match protocol.render(lua)? {
            Rendered::Text(text) => lua.create_string(&text).map(Value::String),
            Rendered::Value(value) => Ok(value),
        }
    }

    fn set(&self, _lua: &Lua, value: Value) -> mlua::Result<()> {
        let mut protocol = self.protocol.try_borrow_mut().map_err(|_| Self::busy())?;
        Ok(protocol.assign(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::script::Script;

    fn protocol(env: &Environment) -> Rc<RefCell<OutputProtocol>> {
        let options = ContextOptions { colors: false, ..ContextOptions::default() };
        Rc::new(RefCell::new(OutputProtocol::new(
            HandshakeToken::generate(),
            env.globals(),
            env.shared_builtins(),
            Rc::new(RefCell::new(options)),
            Rc::new(StyleTable::empty()),
            None,
        )))
    }

    fn bootstrapped() -> (Environment, Rc<RefCell<OutputProtocol>>) {
        let env = Environment::isolated().unwrap();
        let protocol = protocol(&env);
        env.intercept(SENTINEL, Rc::new(SentinelAccessor::new(protocol.clone()))).unwrap();
        env.execute(&Script::raw(include_str!("inspector.lua"), None), None).unwrap();
        (env, protocol)
    }

    fn text(env: &Environment, s: &str) -> Value {
        Value::String(env.lua().create_string(s).unwrap())
    }

    #[test]
    fn test_mode_strings_are_saved_before_handshake() {
        let env = Environment::isolated().unwrap();
        let protocol = protocol(&env);
        let mut protocol = protocol.borrow_mut();
        assert!(matches!(protocol.decode(text(&env, FILTER_REQUEST)), Signal::Save(_)));
        assert!(matches!(protocol.decode(text(&env, SNAPSHOT_REQUEST)), Signal::Save(_)));
        assert!(protocol.dispatch(Signal::RequestSnapshot).is_err());
        assert_eq!(protocol.phase(), Phase::AwaitingHandshake);
    }

    #[test]
    fn test_reading_before_handshake_yields_token() {
        let env = Environment::isolated().unwrap();
        let protocol = protocol(&env);
        let token = protocol.borrow().token.as_str().to_string();
        match protocol.borrow_mut().render(env.lua()).unwrap() {
            Rendered::Text(t) => assert_eq!(t, token),
            other => panic!("unexpected {other:?}"),
        };
    }

    #[test]
    fn test_token_without_helpers_fails() {
        let env = Environment::isolated().unwrap();
        let protocol = protocol(&env);
        let token = protocol.borrow().token.clone();
        let err = protocol.borrow_mut().dispatch(Signal::Handshake(token)).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_bootstrap_handshake() {
        let (env, protocol) = bootstrapped();
        assert_eq!(protocol.borrow().phase(), Phase::Steady);
        assert_eq!(protocol.borrow().sub_mode(), SubMode::Idle);
        assert!(protocol.borrow().helpers().is_some());
        assert!(!env.enumerate().unwrap().contains("inspect"));
    }

    #[test]
    fn test_repeated_handshake_is_ignored() {
        let (env, protocol) = bootstrapped();
        env.execute(&Script::raw("_ = 7", None), None).unwrap();
        let token = protocol.borrow().token.clone();
        protocol.borrow_mut().dispatch(Signal::Handshake(token.clone())).unwrap();
        protocol.borrow_mut().assign(text(&env, token.as_str())).unwrap();
        assert_eq!(protocol.borrow().phase(), Phase::Steady);
        assert!(matches!(protocol.borrow().last().unwrap().result, Value::Integer(7)));
    }

    #[test]
    fn test_snapshot_then_save_reports_new_names() {
        let (env, protocol) = bootstrapped();
        protocol.borrow_mut().dispatch(Signal::RequestSnapshot).unwrap();
        assert_eq!(protocol.borrow().sub_mode(), SubMode::DiffSnapshot);

        env.execute(&Script::raw("b = 2; a = 1; _ = a + b", None), None).unwrap();

        let protocol = protocol.borrow();
        let last = protocol.last().unwrap();
        assert!(matches!(last.result, Value::Integer(3)));
        assert_eq!(last.globals.as_deref(), Some(&["a".to_string(), "b".to_string()][..]));
        assert_eq!(protocol.sub_mode(), SubMode::Idle);
    }

    #[test]
    fn test_completion_reports_names_from_whole_run() {
        let (env, protocol) = bootstrapped();
        protocol.borrow_mut().dispatch(Signal::RequestSnapshot).unwrap();
        env.execute(&Script::raw("a = 1; _ = 'x'; b = 2", None), None).unwrap();
        assert_eq!(protocol.borrow().last().unwrap().globals.as_deref(), Some(&["a".to_string()][..]));

        protocol.borrow_mut().complete_run(Value::Integer(2)).unwrap();
        let protocol = protocol.borrow();
        let last = protocol.last().unwrap();
        assert!(matches!(last.result, Value::Integer(2)));
        assert_eq!(last.globals.as_deref(), Some(&["a".to_string(), "b".to_string()][..]));
    }

    #[test]
    fn test_save_without_snapshot_has_no_globals() {
        let (env, protocol) = bootstrapped();
        env.execute(&Script::raw("_ = 'hello'", None), None).unwrap();
        assert_eq!(protocol.borrow().last().unwrap().globals, None);
    }

    #[test]
    fn test_settle_drops_baseline() {
        let (_env, protocol) = bootstrapped();
        protocol.borrow_mut().dispatch(Signal::RequestSnapshot).unwrap();
        protocol.borrow_mut().settle();
        assert!(!protocol.borrow().has_baseline());
        assert_eq!(protocol.borrow().sub_mode(), SubMode::Idle);
    }

    #[test]
    fn test_reads_do_not_save() {
        let (env, protocol) = bootstrapped();
        env.execute(&Script::raw("_ = 41", None), None).unwrap();
        env.execute(&Script::raw("local seen = _; local again = _", None), None).unwrap();
        assert!(matches!(protocol.borrow().last().unwrap().result, Value::Integer(41)));
    }
}
