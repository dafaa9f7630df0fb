//! Execution core for the moonrepl shell: isolated Lua contexts, the output
//! protocol spoken over `_`, and the inspector bootstrap.

pub mod completion;
pub mod context;
pub mod environment;
pub mod error;
pub mod identity;
pub mod inspect;
pub mod manager;
pub mod protocol;
pub mod script;

pub use context::{Context, ContextOptions, ContextRef, Evaluation, Services};
pub use environment::{Accessor, Environment, EnvironmentKind};
pub use error::{Error, Result};
pub use identity::{Identity, NamePool, SharedNamePool};
pub use inspect::{Category, Helpers, Inspect, StyleTable};
pub use manager::ContextManager;
pub use protocol::{LastResult, Phase, Signal, SubMode};
pub use script::{Compile, CompiledScript, FileLoader, Load, LuaCompiler, Script};
