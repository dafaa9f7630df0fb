//! Creates contexts and owns the global one.
//!
//! The manager holds the driver's own Lua state. The global context runs
//! directly in that state, so its inner and outer worlds coincide; every
//! other context gets a fresh isolated state.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mlua::{Lua, Table, Value};

use crate::context::{Context, ContextOptions, ContextRef, Services};
use crate::environment::{Accessor, Environment};
use crate::error::Result;
use crate::identity::SharedNamePool;
use crate::inspect::{Inspect, StyleTable};
use crate::script::{Compile, Load, Script};

pub struct ContextManager {
    lua: Rc<Lua>,
    services: Services,
    global: Option<ContextRef>,
}

impl ContextManager {
    pub fn new() -> Result<Self> {
        Ok(Self::with_services(Services::new()?))
    }

    pub fn with_services(services: Services) -> Self {
        Self { lua: Rc::new(Lua::new()), services, global: None }
    }

    /// Draw names and colors from `pool` instead of the process-wide one.
    pub fn with_names(mut self, pool: SharedNamePool) -> Self {
        self.services.names = pool;
        self
    }

    pub fn with_compiler(mut self, compiler: Rc<dyn Compile>) -> Self {
        self.services.compiler = compiler;
        self
    }

    pub fn with_loader(mut self, loader: Rc<dyn Load>) -> Self {
        self.services.loader = loader;
        self
    }

    pub fn with_inspector(mut self, inspector: Rc<dyn Inspect>) -> Self {
        self.services.inspector = Some(inspector);
        self
    }

    pub fn with_styles(mut self, styles: StyleTable) -> Self {
        self.services.styles = Rc::new(styles);
        self
    }

    /// Options applied to every new context.
    pub fn with_defaults(mut self, defaults: ContextOptions) -> Self {
        self.services.defaults = defaults;
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// The global context, if one was created.
    pub fn global(&self) -> Option<ContextRef> {
        self.global.clone()
    }

    /// Create a context. Asking for the global context a second time
    /// returns the same one.
    pub fn create(&mut self, is_global: bool) -> Result<ContextRef> {
        if !is_global {
            let environment = Environment::isolated()?;
            let context = Context::new(environment, self.services.clone(), false)?;
            return Ok(Rc::new(RefCell::new(context)));
        }
        if let Some(global) = &self.global {
            return Ok(global.clone());
        }

        install_driver_bindings(&self.lua, self.services.loader.clone())?;
        let environment = Environment::privileged(self.lua.clone())?;
        environment.intercept("exports", Rc::new(ExportsAccessor))?;

        let context = Rc::new(RefCell::new(Context::new(environment, self.services.clone(), true)?));
        self.global = Some(context.clone());
        Ok(context)
    }
}

/// `module`, `require` and the module cache for the global context.
fn install_driver_bindings(lua: &Lua, loader: Rc<dyn Load>) -> Result<()> {
    let module = lua.create_table()?;
    module.raw_set("exports", lua.create_table()?)?;
    let loaded = lua.create_table()?;
    module.raw_set("loaded", loaded.clone())?;

    let require = lua.create_function(move |lua, name: String| {
        match loaded.raw_get::<Value>(name.as_str())? {
            Value::Nil => {}
            cached => return Ok(cached),
        }
        let path = module_path(&name);
        log::debug!("require {} from {}", name, path.display());
        let compiled = loader.load(&path)?;
        let value = match Script::compiled(compiled).exec(lua)?.into_iter().next() {
            Some(Value::Nil) | None => Value::Boolean(true),
            Some(value) => value,
        };
        loaded.raw_set(name.as_str(), value.clone())?;
        Ok(value)
    })?;

    let globals = lua.globals();
    globals.raw_set("module", module)?;
    globals.raw_set("require", require)?;
    Ok(())
}

/// `a.b` resolves to `a/b.lua`; names ending in `.lua` are used as paths.
fn module_path(name: &str) -> PathBuf {
    if name.ends_with(".lua") {
        return Path::new(name).to_path_buf();
    }
    let mut path: PathBuf = name.split('.').collect();
    path.set_extension("lua");
    path
}

/// Forwards `exports` to `module.exports`.
struct ExportsAccessor;

impl ExportsAccessor {
    fn module(lua: &Lua) -> mlua::Result<Table> {
        match lua.globals().raw_get::<Value>("module")? {
            Value::Table(module) => Ok(module),
            _ => Err(mlua::Error::RuntimeError("`module` is not a table".to_string())),
        }
    }
}

impl Accessor for ExportsAccessor {
    fn get(&self, lua: &Lua) -> mlua::Result<Value> {
        Self::module(lua)?.raw_get("exports")
    }

    fn set(&self, lua: &Lua, value: Value) -> mlua::Result<()> {
        Self::module(lua)?.raw_set("exports", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_path() {
        assert_eq!(module_path("util"), PathBuf::from("util.lua"));
        assert_eq!(module_path("lib.strings"), PathBuf::from("lib/strings.lua"));
        assert_eq!(module_path("./local.lua"), PathBuf::from("./local.lua"));
    }
}
