//! Scripts and the collaborators that produce them.
//!
//! A compiled script passed syntax validation and runs in any environment.
//! A raw script is literal source that failed validation; it still runs,
//! and whatever error Lua raises surfaces at run time.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use mlua::{Lua, LuaOptions, MultiValue, StdLib};

use crate::error::{format_lua_error, Error, Result};

/// Chunk name used for unnamed input.
const DEFAULT_CHUNK_NAME: &str = "repl";

/// Source that passed syntax validation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    code: Rc<str>,
    chunk: Rc<str>,
    name: Option<String>,
    expression: bool,
}

impl CompiledScript {
    /// The source as the user wrote it.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the source was wrapped as `return (...)`.
    pub fn is_expression(&self) -> bool {
        self.expression
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    Compiled(CompiledScript),
    Raw { code: Rc<str>, name: Option<String> },
}

/// A unit of executable code plus the globals its first run introduced.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    body: Body,
    globals: Option<Vec<String>>,
}

impl Script {
    pub fn compiled(script: CompiledScript) -> Self {
        Self { body: Body::Compiled(script), globals: None }
    }

    pub fn raw(code: impl Into<String>, name: Option<&str>) -> Self {
        let code: String = code.into();
        Self {
            body: Body::Raw { code: code.into(), name: name.map(str::to_string) },
            globals: None,
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.body, Body::Compiled(_))
    }

    pub fn code(&self) -> &str {
        match &self.body {
            Body::Compiled(c) => c.code(),
            Body::Raw { code, .. } => code.as_ref(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.body {
            Body::Compiled(c) => c.name(),
            Body::Raw { name, .. } => name.as_deref(),
        }
    }

    /// New top-level bindings recorded by the most recent run.
    pub fn globals(&self) -> Option<&[String]> {
        self.globals.as_deref()
    }

    pub(crate) fn set_globals(&mut self, globals: Option<Vec<String>>) {
        self.globals = globals;
    }

    pub(crate) fn exec(&self, lua: &Lua) -> mlua::Result<MultiValue> {
        let (chunk, name): (&str, Option<&str>) = match &self.body {
            Body::Compiled(c) => (c.chunk.as_ref(), c.name()),
            Body::Raw { code, name } => (code.as_ref(), name.as_deref()),
        };
        lua.load(chunk).set_name(chunk_name(name)).eval::<MultiValue>()
    }
}

fn chunk_name(name: Option<&str>) -> String {
    format!("={}", name.unwrap_or(DEFAULT_CHUNK_NAME))
}

/// Turns source text into a validated script.
pub trait Compile {
    fn compile(&self, source: &str, name: Option<&str>) -> Result<CompiledScript>;

    /// Whether `source` only fails because it ends too early, so more
    /// input could complete it.
    fn is_incomplete(&self, _source: &str) -> bool {
        false
    }
}

/// Loads a validated script from a path.
pub trait Load {
    fn load(&self, path: &Path) -> Result<CompiledScript>;
}

/// Syntax-checks Lua source in a scratch state.
///
/// Input that parses as an expression is wrapped in `return (...)` so its
/// value becomes the run's result: typing `1 + 1` yields `2`, not nothing.
pub struct LuaCompiler {
    lua: Lua,
}

impl LuaCompiler {
    pub fn new() -> Result<Self> {
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::default())
            .map_err(|e| Error::EnvironmentInit(e.to_string()))?;
        Ok(Self { lua })
    }

    fn parses(&self, chunk: &str, name: Option<&str>) -> mlua::Result<()> {
        self.lua.load(chunk).set_name(chunk_name(name)).into_function().map(|_| ())
    }
}

impl Compile for LuaCompiler {
    fn compile(&self, source: &str, name: Option<&str>) -> Result<CompiledScript> {
        let trimmed = source.trim();

        // Newline before the paren so a trailing comment cannot swallow it.
        let as_expr = format!("return ({}\n)", trimmed);
        let (chunk, expression) = if !trimmed.is_empty() && self.parses(&as_expr, name).is_ok() {
            (as_expr, true)
        } else {
            self.parses(source, name).map_err(|e| Error::Compile {
                name: name.map(str::to_string),
                message: format_lua_error(&e),
            })?;
            (source.to_string(), false)
        };

        Ok(CompiledScript {
            code: source.into(),
            chunk: chunk.into(),
            name: name.map(str::to_string),
            expression,
        })
    }

    fn is_incomplete(&self, source: &str) -> bool {
        matches!(
            self.parses(source, None),
            Err(mlua::Error::SyntaxError { incomplete_input: true, .. })
        )
    }
}

/// Reads scripts from disk and validates them with a `LuaCompiler`.
pub struct FileLoader {
    compiler: LuaCompiler,
}

impl FileLoader {
    pub fn new() -> Result<Self> {
        Ok(Self { compiler: LuaCompiler::new()? })
    }
}

impl Load for FileLoader {
    fn load(&self, path: &Path) -> Result<CompiledScript> {
        let source = fs::read_to_string(path).map_err(|e| Error::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let name = path.display().to_string();
        self.compiler.compile(&source, Some(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn first(values: MultiValue) -> mlua::Value {
        values.into_iter().next().unwrap_or(mlua::Value::Nil)
    }

    #[test]
    fn test_expression_is_wrapped() {
        let compiler = LuaCompiler::new().unwrap();
        let script = compiler.compile("1 + 1", None).unwrap();
        assert!(script.is_expression());
        assert_eq!(script.code(), "1 + 1");

        let lua = Lua::new();
        let value = first(Script::compiled(script).exec(&lua).unwrap());
        assert_eq!(value.as_integer(), Some(2));
    }

    #[test]
    fn test_statements_are_kept() {
        let compiler = LuaCompiler::new().unwrap();
        let script = compiler.compile("x = 1; return x + 1", None).unwrap();
        assert!(!script.is_expression());
    }

    #[test]
    fn test_trailing_comment_expression() {
        let compiler = LuaCompiler::new().unwrap();
        let script = compiler.compile("40 + 2 -- answer", None).unwrap();
        assert!(script.is_expression());
    }

    #[test]
    fn test_syntax_error() {
        let compiler = LuaCompiler::new().unwrap();
        let err = compiler.compile("if then", Some("broken")).unwrap_err();
        assert!(matches!(err, Error::Compile { ref name, .. } if name.as_deref() == Some("broken")));
    }

    #[test]
    fn test_incomplete_input() {
        let compiler = LuaCompiler::new().unwrap();
        assert!(compiler.is_incomplete("function twice(x)\n  return x * 2\n"));
        assert!(compiler.is_incomplete("t = {"));
        assert!(!compiler.is_incomplete("function twice(x) return x * 2 end"));
        assert!(!compiler.is_incomplete("if then"));
    }

    #[test]
    fn test_raw_script_fails_at_run_time() {
        let lua = Lua::new();
        let script = Script::raw("if then", None);
        assert!(!script.is_compiled());
        assert!(script.exec(&lua).is_err());
    }

    #[test]
    fn test_file_loader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "answer = 42").unwrap();
        let loader = FileLoader::new().unwrap();
        let script = loader.load(file.path()).unwrap();
        assert_eq!(script.name(), Some(file.path().display().to_string().as_str()));
    }

    #[test]
    fn test_file_loader_missing_path() {
        let loader = FileLoader::new().unwrap();
        let err = loader.load(Path::new("/definitely/not/here.lua")).unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
    }
}
