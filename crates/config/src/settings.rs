// REPL settings
// Loaded from ~/.config/moonrepl/settings.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Failure reading or writing a settings file.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    Read { path: PathBuf, message: String },
    Parse { path: PathBuf, message: String },
    Write { path: PathBuf, message: String },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, message } => write!(f, "cannot read {}: {}", path.display(), message),
            Self::Parse { path, message } => write!(f, "invalid settings in {}: {}", path.display(), message),
            Self::Write { path, message } => write!(f, "cannot write {}: {}", path.display(), message),
        }
    }
}

impl std::error::Error for SettingsError {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Inspector
    #[serde(rename = "inspector.depth")]
    pub depth: usize,

    #[serde(rename = "inspector.colors")]
    pub colors: bool,

    #[serde(rename = "inspector.showBuiltins")]
    pub show_builtins: bool,

    #[serde(rename = "inspector.hidden")]
    pub hidden: Vec<String>,

    // Contexts
    #[serde(rename = "context.names")]
    pub names: Vec<String>,  // empty = built-in moon names

    #[serde(rename = "context.palette")]
    pub palette: Vec<String>,  // color names, empty = built-in palette

    #[serde(rename = "context.instructionLimit")]
    pub instruction_limit: Option<u64>,  // None = unbounded

    // Category -> color name, e.g. "String": "green"
    #[serde(rename = "styles")]
    pub styles: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Inspector
            depth: 2,
            colors: true,
            show_builtins: false,
            hidden: Vec::new(),
            // Contexts
            names: Vec::new(),
            palette: Vec::new(),
            instruction_limit: None,
            // Styles
            styles: BTreeMap::new(),
        }
    }
}

const DEFAULT_FILE: &str = r#"{
    // Inspector output
    "inspector.depth": 2,
    "inspector.colors": true,
    "inspector.showBuiltins": false,
    "inspector.hidden": [],

    // Context names and colors (empty = built-in lists)
    "context.names": [],
    "context.palette": [],
    "context.instructionLimit": null,

    // Colors per category: Name, Constructor, String, Number, Boolean,
    // Nil, Function, Table, Punctuation, Other
    "styles": {}
}
"#;

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("moonrepl");
        config_dir.join("settings.json")
    }

    /// Load settings from the default location, falling back to defaults.
    /// A commented default file is created on first use.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            if let Err(e) = Self::write_default_file(&path) {
                log::warn!("{}", e);
            }
            return Self::default();
        }
        Self::load_or_default(&path)
    }

    /// Load settings from `path`; missing or broken files yield defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(path) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    /// Load settings from `path`.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&contents).map_err(|message| SettingsError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parse settings JSON, ignoring lines that start with `//`.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::from_str(&cleaned).map_err(|e| e.to_string())
    }

    /// Save current settings to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let write_err = |message: String| SettingsError::Write {
            path: path.to_path_buf(),
            message,
        };

        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| write_err(e.to_string()))?;
        fs::write(path, json).map_err(|e| write_err(e.to_string()))
    }

    /// Create the default settings file with comments
    pub fn write_default_file(path: &Path) -> Result<(), SettingsError> {
        let write_err = |e: std::io::Error| SettingsError::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, DEFAULT_FILE).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_parses_to_defaults() {
        assert_eq!(Settings::parse(DEFAULT_FILE).unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let settings = Settings::parse(
            r#"{
            // deeper tables
            "inspector.depth": 4,
            "inspector.hidden": ["secret"],
            "styles": { "String": "magenta" }
        }"#,
        )
        .unwrap();
        assert_eq!(settings.depth, 4);
        assert_eq!(settings.hidden, vec!["secret"]);
        assert_eq!(settings.styles.get("String").map(String::as_str), Some("magenta"));
        assert!(settings.colors);
        assert_eq!(settings.instruction_limit, None);
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(SettingsError::Parse { .. })));
        assert_eq!(Settings::load_or_default(&path), Settings::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert_eq!(Settings::load_or_default(&path), Settings::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            palette: vec!["red".into(), "#336699".into()],
            instruction_limit: Some(1_000_000),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }
}
