use std::fmt;
use std::path::PathBuf;

/// Errors raised by contexts, scripts and the output protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A Lua state could not be created or sandboxed.
    EnvironmentInit(String),
    /// Source failed syntax validation.
    Compile { name: Option<String>, message: String },
    /// A script file could not be read.
    Load { path: PathBuf, message: String },
    /// Failure raised while a script ran inside an environment.
    Runtime(String),
    /// The inspector handshake or sentinel dispatch failed.
    Protocol(String),
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Short label used by the REPL when listing captured errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnvironmentInit(_) => "environment",
            Self::Compile { .. } => "compile",
            Self::Load { .. } => "load",
            Self::Runtime(_) => "runtime",
            Self::Protocol(_) => "protocol",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvironmentInit(msg) => write!(f, "cannot create environment: {msg}"),
            Self::Compile { name: Some(name), message } => write!(f, "{name}: {message}"),
            Self::Compile { name: None, message } => write!(f, "syntax error: {message}"),
            Self::Load { path, message } => write!(f, "cannot load {}: {message}", path.display()),
            Self::Runtime(msg) => write!(f, "{msg}"),
            Self::Protocol(msg) => write!(f, "output protocol: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<mlua::Error> for Error {
    fn from(error: mlua::Error) -> Self {
        match &error {
            // Our own errors raised inside callbacks keep their variant.
            mlua::Error::ExternalError(inner) => {
                if let Some(own) = inner.downcast_ref::<Error>() {
                    return own.clone();
                }
            }
            mlua::Error::CallbackError { cause, .. } => return Error::from((**cause).clone()),
            _ => {}
        }
        Self::Runtime(format_lua_error(&error))
    }
}

impl From<Error> for mlua::Error {
    fn from(error: Error) -> Self {
        mlua::Error::external(error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Format a Lua error for display.
pub(crate) fn format_lua_error(error: &mlua::Error) -> String {
    match error {
        mlua::Error::SyntaxError { message, .. } => {
            // Strip the "[string \"...\"]:1: " prefix if present
            if let Some(idx) = message.find("]:") {
                message[idx + 2..].trim_start().to_string()
            } else {
                message.clone()
            }
        }
        mlua::Error::RuntimeError(msg) => msg.clone(),
        mlua::Error::CallbackError { cause, .. } => format_lua_error(cause),
        _ => error.to_string(),
    }
}
