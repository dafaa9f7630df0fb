//! Lua environments that contexts execute in.
//!
//! # Architecture Notes
//!
//! An isolated environment owns its own `mlua::Lua` state, so nothing a
//! script defines can leak into another context. The privileged environment
//! wraps the driver's own state instead; see `ContextManager`.
//!
//! Reads and writes of selected global names are routed through `Accessor`
//! strategy objects. The globals table carries a protected metatable whose
//! `__index`/`__newindex` consult the accessor map; intercepted names are
//! never stored in the table itself, so every access reaches the accessor.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use mlua::{HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value, VmState};

use crate::error::{Error, Result};
use crate::script::Script;

/// Maximum number of captured print() lines per environment.
pub const MAX_OUTPUT_LINES: usize = 5_000;

/// How often the instruction budget hook runs (every N instructions).
pub const INSTRUCTION_HOOK_INTERVAL: u32 = 10_000;

/// Globals removed from isolated environments.
const SANDBOXED: &[&str] = &[
    "os", "io", "debug", "package", "require", "loadfile", "dofile", "load",
];

/// Strategy for one intercepted global name.
pub trait Accessor {
    fn get(&self, lua: &Lua) -> mlua::Result<Value>;
    fn set(&self, lua: &Lua, value: Value) -> mlua::Result<()>;
}

type AccessorMap = Rc<RefCell<HashMap<String, Rc<dyn Accessor>>>>;

/// Which world an environment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    /// A fresh, sandboxed Lua state.
    Isolated,
    /// The driver's own Lua state.
    Privileged,
}

/// Lines captured from print() calls.
#[derive(Debug, Default)]
struct PrintBuffer {
    lines: Vec<String>,
    truncated: bool,
}

impl PrintBuffer {
    fn push(&mut self, line: String) {
        if self.lines.len() < MAX_OUTPUT_LINES {
            self.lines.push(line);
        } else {
            self.truncated = true;
        }
    }

    fn take(&mut self) -> Vec<String> {
        let mut lines = std::mem::take(&mut self.lines);
        if std::mem::take(&mut self.truncated) {
            lines.push(format!("... output truncated ({} line limit)", MAX_OUTPUT_LINES));
        }
        lines
    }
}

/// An execution space with its own top-level binding table.
pub struct Environment {
    lua: Rc<Lua>,
    kind: EnvironmentKind,
    builtins: Rc<BTreeSet<String>>,
    accessors: AccessorMap,
    output: Rc<RefCell<PrintBuffer>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("kind", &self.kind)
            .field("builtins", &self.builtins.len())
            .finish()
    }
}

impl Environment {
    /// Create a fresh sandboxed environment.
    ///
    /// We keep: basic, string, table, math, utf8, coroutine.
    /// We remove: os, io, debug, package, require, loadfile, dofile, load.
    pub fn isolated() -> Result<Self> {
        let lua = Lua::new_with(StdLib::ALL_SAFE, LuaOptions::default())
            .map_err(|e| Error::EnvironmentInit(e.to_string()))?;
        let globals = lua.globals();
        for name in SANDBOXED {
            globals
                .raw_set(*name, Value::Nil)
                .map_err(|e| Error::EnvironmentInit(e.to_string()))?;
        }
        Self::with_state(Rc::new(lua), EnvironmentKind::Isolated)
    }

    /// Wrap the driver's own Lua state. Whatever the driver installed
    /// before this call counts as built-in.
    pub fn privileged(lua: Rc<Lua>) -> Result<Self> {
        Self::with_state(lua, EnvironmentKind::Privileged)
    }

    fn with_state(lua: Rc<Lua>, kind: EnvironmentKind) -> Result<Self> {
        let output = Rc::new(RefCell::new(PrintBuffer::default()));
        let accessors: AccessorMap = Rc::new(RefCell::new(HashMap::new()));

        install_print(&lua, output.clone()).map_err(|e| Error::EnvironmentInit(e.to_string()))?;
        install_interceptor(&lua, accessors.clone())
            .map_err(|e| Error::EnvironmentInit(e.to_string()))?;

        let mut env = Self {
            lua,
            kind,
            builtins: Rc::new(BTreeSet::new()),
            accessors,
            output,
        };
        env.builtins = Rc::new(env.enumerate()?);
        Ok(env)
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    pub fn kind(&self) -> EnvironmentKind {
        self.kind
    }

    /// The environment's top-level object (`_G`).
    pub fn globals(&self) -> Table {
        self.lua.globals()
    }

    /// Names present when the environment was created.
    pub fn builtins(&self) -> &BTreeSet<String> {
        &self.builtins
    }

    pub(crate) fn shared_builtins(&self) -> Rc<BTreeSet<String>> {
        self.builtins.clone()
    }

    /// Names of all bindings directly visible at the top level right now.
    ///
    /// Intercepted names are not bindings and are never listed, even while
    /// a raw value shadows them.
    pub fn enumerate(&self) -> Result<BTreeSet<String>> {
        let accessors = self.accessors.borrow();
        let mut names = BTreeSet::new();
        for pair in self.globals().pairs::<Value, Value>() {
            let (key, _) = pair?;
            if let Value::String(s) = key {
                let name = s.to_string_lossy().to_string();
                if !accessors.contains_key(&name) {
                    names.insert(name);
                }
            }
        }
        Ok(names)
    }

    /// Drop raw values stored under intercepted names.
    ///
    /// `rawset(_G, name, v)` skips the metatable and would shadow the
    /// accessor from then on.
    pub fn reclaim_intercepted(&self) -> Result<()> {
        let globals = self.globals();
        for name in self.accessors.borrow().keys() {
            if !globals.raw_get::<Value>(name.as_str())?.is_nil() {
                log::debug!("dropping raw value shadowing `{}`", name);
                globals.raw_set(name.as_str(), Value::Nil)?;
            }
        }
        Ok(())
    }

    /// Route reads and writes of `name` through `accessor`.
    pub fn intercept(&self, name: &str, accessor: Rc<dyn Accessor>) -> Result<()> {
        // A raw value would shadow the metamethods.
        self.globals().raw_set(name, Value::Nil)?;
        self.accessors.borrow_mut().insert(name.to_string(), accessor);
        Ok(())
    }

    /// Execute a script, optionally bounded by an instruction budget.
    pub fn execute(&self, script: &Script, instruction_limit: Option<u64>) -> Result<MultiValue> {
        if let Some(limit) = instruction_limit {
            let budget = Rc::new(Cell::new(i64::try_from(limit).unwrap_or(i64::MAX)));
            self.lua.set_hook(
                HookTriggers::new().every_nth_instruction(INSTRUCTION_HOOK_INTERVAL),
                move |_lua, _debug| {
                    let remaining = budget.get() - INSTRUCTION_HOOK_INTERVAL as i64;
                    budget.set(remaining);
                    if remaining <= 0 {
                        Err(mlua::Error::RuntimeError(format!(
                            "instruction limit exceeded ({} instructions)",
                            limit
                        )))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        let result = script.exec(&self.lua);

        if instruction_limit.is_some() {
            self.lua.remove_hook();
        }
        result.map_err(Error::from)
    }

    /// Drain lines printed since the last call.
    pub fn take_output(&self) -> Vec<String> {
        self.output.borrow_mut().take()
    }
}

/// Override print() to capture output (with cap).
fn install_print(lua: &Lua, buffer: Rc<RefCell<PrintBuffer>>) -> mlua::Result<()> {
    let print_fn = lua.create_function(move |_, args: MultiValue| {
        let parts: Vec<String> = args.iter().map(display_value).collect();
        buffer.borrow_mut().push(parts.join("\t"));
        Ok(())
    })?;
    lua.globals().raw_set("print", print_fn)
}

fn install_interceptor(lua: &Lua, accessors: AccessorMap) -> mlua::Result<()> {
    let meta = lua.create_table()?;

    let reads = accessors.clone();
    let index = lua.create_function(move |lua, (_globals, key): (Table, Value)| {
        match lookup(&reads, &key) {
            Some(accessor) => accessor.get(lua),
            None => Ok(Value::Nil),
        }
    })?;

    let writes = accessors;
    let newindex = lua.create_function(move |lua, (globals, key, value): (Table, Value, Value)| {
        match lookup(&writes, &key) {
            Some(accessor) => accessor.set(lua, value),
            None => globals.raw_set(key, value),
        }
    })?;

    meta.raw_set("__index", index)?;
    meta.raw_set("__newindex", newindex)?;
    // Scripts cannot read or replace the metatable.
    meta.raw_set("__metatable", false)?;
    lua.globals().set_metatable(Some(meta));
    Ok(())
}

fn lookup(accessors: &AccessorMap, key: &Value) -> Option<Rc<dyn Accessor>> {
    match key {
        Value::String(s) => {
            let name = s.to_str().ok()?;
            accessors.borrow().get(&*name).cloned()
        }
        _ => None,
    }
}

/// Convert a Lua value to print() text.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{:.0}", n)
            } else {
                format!("{}", n)
            }
        }
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Table(_) => "table".to_string(),
        Value::Function(_) => "function".to_string(),
        Value::Thread(_) => "thread".to_string(),
        Value::UserData(_) | Value::LightUserData(_) => "userdata".to_string(),
        Value::Error(e) => format!("error: {}", e),
        _ => "<unknown>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        reads: Cell<usize>,
        last: RefCell<Option<i64>>,
    }

    impl Accessor for Counter {
        fn get(&self, _lua: &Lua) -> mlua::Result<Value> {
            self.reads.set(self.reads.get() + 1);
            Ok(Value::Integer(self.reads.get() as i64))
        }

        fn set(&self, _lua: &Lua, value: Value) -> mlua::Result<()> {
            if let Value::Integer(i) = value {
                *self.last.borrow_mut() = Some(i);
            }
            Ok(())
        }
    }

    fn run(env: &Environment, code: &str) -> Result<MultiValue> {
        env.execute(&Script::raw(code, None), None)
    }

    #[test]
    fn test_sandbox_removes_os_io_load() {
        let env = Environment::isolated().unwrap();
        for name in ["os", "io", "require", "load", "dofile"] {
            assert!(!env.builtins().contains(name), "{name} should be sandboxed");
        }
        assert!(run(&env, "os.execute('ls')").is_err());
        assert!(env.builtins().contains("string"));
        assert!(env.builtins().contains("print"));
    }

    #[test]
    fn test_enumerate_is_idempotent() {
        let env = Environment::isolated().unwrap();
        run(&env, "a = 1; b = {}").unwrap();
        let first = env.enumerate().unwrap();
        let second = env.enumerate().unwrap();
        assert_eq!(first, second);
        assert!(first.contains("a") && first.contains("b"));
    }

    #[test]
    fn test_environments_are_isolated() {
        let one = Environment::isolated().unwrap();
        let two = Environment::isolated().unwrap();
        run(&one, "shared = 42; string.extra = true").unwrap();
        assert!(!two.enumerate().unwrap().contains("shared"));
        let leaked = run(&two, "return string.extra").unwrap();
        assert!(matches!(leaked.into_iter().next(), Some(Value::Nil)));
    }

    #[test]
    fn test_intercepted_name_routes_reads_and_writes() {
        let env = Environment::isolated().unwrap();
        let counter = Rc::new(Counter { reads: Cell::new(0), last: RefCell::new(None) });
        env.intercept("gauge", counter.clone()).unwrap();

        run(&env, "gauge = 7").unwrap();
        assert_eq!(*counter.last.borrow(), Some(7));
        assert!(!env.enumerate().unwrap().contains("gauge"));

        let values = run(&env, "return gauge + gauge").unwrap();
        assert!(matches!(values.into_iter().next(), Some(Value::Integer(3))));
    }

    #[test]
    fn test_raw_shadow_of_intercepted_name_is_reclaimed() {
        let env = Environment::isolated().unwrap();
        let counter = Rc::new(Counter { reads: Cell::new(0), last: RefCell::new(None) });
        env.intercept("gauge", counter.clone()).unwrap();

        run(&env, "rawset(_G, 'gauge', 100); gauge = 5").unwrap();
        assert_eq!(*counter.last.borrow(), None);
        assert!(!env.enumerate().unwrap().contains("gauge"));

        env.reclaim_intercepted().unwrap();
        run(&env, "gauge = 6").unwrap();
        assert_eq!(*counter.last.borrow(), Some(6));
    }

    #[test]
    fn test_metatable_is_protected() {
        let env = Environment::isolated().unwrap();
        let values = run(&env, "return getmetatable(_G)").unwrap();
        assert!(matches!(values.into_iter().next(), Some(Value::Boolean(false))));
        assert!(run(&env, "setmetatable(_G, nil)").is_err());
    }

    #[test]
    fn test_print_capture() {
        let env = Environment::isolated().unwrap();
        run(&env, "print('hello', 'world'); print(1.5, nil)").unwrap();
        assert_eq!(env.take_output(), vec!["hello\tworld", "1.5\tnil"]);
        assert!(env.take_output().is_empty());
    }

    #[test]
    fn test_instruction_limit() {
        let env = Environment::isolated().unwrap();
        let err = env
            .execute(&Script::raw("while true do end", None), Some(100_000))
            .unwrap_err();
        assert!(err.to_string().contains("instruction limit exceeded"));
        // The hook is removed again afterwards.
        assert!(run(&env, "for i = 1, 200000 do end").is_ok());
    }

    #[test]
    fn test_instruction_limit_beyond_i64_does_not_abort() {
        let env = Environment::isolated().unwrap();
        let limit = Some(u64::MAX);
        assert!(env.execute(&Script::raw("for i = 1, 10000 do end", None), limit).is_ok());
    }
}
