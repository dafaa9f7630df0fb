//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain      | Description                                  |
//! |---------|-------------|----------------------------------------------|
//! | 0       | Universal   | Success                                      |
//! | 1       | Universal   | General error (unspecified)                  |
//! | 2       | Universal   | CLI usage error (bad args)                   |
//! | 3-9     | execution   | Script loading and evaluation                |
//! | 10-19   | settings    | Settings file problems                       |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `exit_code_for`

use moonrepl_engine::Error;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
/// Raised by clap itself while parsing arguments.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Execution (3-9)
// =============================================================================

/// Script file could not be read.
pub const EXIT_LOAD: u8 = 3;

/// Script failed to compile (file input only; inline code runs raw).
pub const EXIT_COMPILE: u8 = 4;

/// Script raised an error while running.
pub const EXIT_RUNTIME: u8 = 5;

/// A Lua environment could not be created or bootstrapped.
pub const EXIT_INIT: u8 = 6;

// =============================================================================
// Settings (10-19)
// =============================================================================

/// `--settings` file exists but could not be read or parsed.
pub const EXIT_SETTINGS: u8 = 10;

/// Map an engine error to its exit code.
pub fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::Load { .. } => EXIT_LOAD,
        Error::Compile { .. } => EXIT_COMPILE,
        Error::Runtime(_) => EXIT_RUNTIME,
        Error::EnvironmentInit(_) | Error::Protocol(_) => EXIT_INIT,
    }
}
