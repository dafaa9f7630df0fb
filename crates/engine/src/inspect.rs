//! Value inspection and the helpers the bootstrap installs.
//!
//! The bootstrap script defines `names`, `filter`, `inspect` and `combine`
//! inside every environment. `Helpers` holds those functions once the
//! handshake completes; its `Inspect` impl turns the segments produced by the
//! Lua `inspect` helper into text, styled through a `StyleTable`.

use std::collections::{BTreeSet, HashMap};

use crossterm::style::{Color, Stylize};
use mlua::{Function, Table, Value, Variadic};

use crate::context::ContextOptions;
use crate::error::{Error, Result};

/// Semantic categories the inspector tags output with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Name,
    Constructor,
    String,
    Number,
    Boolean,
    Nil,
    Function,
    Table,
    Punctuation,
    Other,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Name,
        Category::Constructor,
        Category::String,
        Category::Number,
        Category::Boolean,
        Category::Nil,
        Category::Function,
        Category::Table,
        Category::Punctuation,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Name => "Name",
            Category::Constructor => "Constructor",
            Category::String => "String",
            Category::Number => "Number",
            Category::Boolean => "Boolean",
            Category::Nil => "Nil",
            Category::Function => "Function",
            Category::Table => "Table",
            Category::Punctuation => "Punctuation",
            Category::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// Colors per category. Categories without an entry render unstyled.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleTable {
    colors: HashMap<Category, Color>,
}

impl Default for StyleTable {
    fn default() -> Self {
        let mut colors = HashMap::new();
        colors.insert(Category::Name, Color::White);
        colors.insert(Category::Constructor, Color::Cyan);
        colors.insert(Category::String, Color::Green);
        colors.insert(Category::Number, Color::Yellow);
        colors.insert(Category::Boolean, Color::Yellow);
        colors.insert(Category::Nil, Color::DarkGrey);
        colors.insert(Category::Function, Color::Magenta);
        colors.insert(Category::Table, Color::Blue);
        Self { colors }
    }
}

impl StyleTable {
    pub fn empty() -> Self {
        Self { colors: HashMap::new() }
    }

    pub fn set(&mut self, category: Category, color: Color) {
        self.colors.insert(category, color);
    }

    pub fn get(&self, category: Category) -> Option<Color> {
        self.colors.get(&category).copied()
    }

    pub fn paint(&self, category: Category, text: &str) -> String {
        match self.get(category) {
            Some(color) => text.with(color).to_string(),
            None => text.to_string(),
        }
    }
}

/// Renders a value for display.
pub trait Inspect {
    fn inspect(&self, value: &Value, options: &ContextOptions, styles: &StyleTable) -> Result<String>;
}

/// The functions the bootstrap script installed in an environment.
#[derive(Clone)]
pub struct Helpers {
    names: Function,
    filter: Function,
    inspect: Function,
    combine: Function,
}

impl std::fmt::Debug for Helpers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Helpers")
    }
}

/// Global names the bootstrap defines before signalling completion.
pub const HELPER_NAMES: [&str; 4] = ["names", "filter", "inspect", "combine"];

impl Helpers {
    /// Take the helpers out of `globals`, leaving no trace among user bindings.
    pub(crate) fn take_from(globals: &Table) -> Result<Self> {
        let mut found = Vec::with_capacity(HELPER_NAMES.len());
        for name in HELPER_NAMES {
            match globals.raw_get::<Value>(name)? {
                Value::Function(f) => found.push(f),
                _ => return Err(Error::protocol(format!("bootstrap did not define `{name}`"))),
            }
        }
        for name in HELPER_NAMES {
            globals.raw_set(name, Value::Nil)?;
        }
        let mut found = found.into_iter();
        match (found.next(), found.next(), found.next(), found.next()) {
            (Some(names), Some(filter), Some(inspect), Some(combine)) => {
                Ok(Self { names, filter, inspect, combine })
            }
            _ => Err(Error::protocol("bootstrap helpers incomplete")),
        }
    }

    /// Sorted string keys of `table`.
    pub fn names(&self, table: &Table) -> Result<Vec<String>> {
        let list: Table = self.names.call(table.clone())?;
        Ok(list.sequence_values::<String>().collect::<mlua::Result<Vec<_>>>()?)
    }

    /// `source` without the `excluded` keys, or with only them when `invert`.
    pub fn filter(&self, source: &Table, excluded: &BTreeSet<String>, invert: bool) -> Result<Table> {
        let excluded: Vec<&str> = excluded.iter().map(String::as_str).collect();
        Ok(self.filter.call((source.clone(), excluded, invert))?)
    }

    /// Merge tables left to right; later keys win.
    pub fn combine(&self, parts: Vec<Table>) -> Result<Table> {
        Ok(self.combine.call(Variadic::from_iter(parts))?)
    }

    /// `(category, text)` pairs describing `value`.
    fn segments(&self, value: &Value, options: &ContextOptions) -> Result<Vec<(String, String)>> {
        let hidden: Vec<&str> = options.hidden_names.iter().map(String::as_str).collect();
        let list: Table = self.inspect.call((value.clone(), depth_arg(options.depth), hidden))?;
        let mut out = Vec::new();
        for segment in list.sequence_values::<Table>() {
            let segment = segment?;
            out.push((segment.raw_get::<String>(1)?, segment.raw_get::<String>(2)?));
        }
        Ok(out)
    }
}

impl Inspect for Helpers {
    fn inspect(&self, value: &Value, options: &ContextOptions, styles: &StyleTable) -> Result<String> {
        let segments = self.segments(value, options)?;
        let mut text = String::new();
        for (kind, part) in segments {
            if options.colors {
                let category = Category::from_label(&kind).unwrap_or(Category::Other);
                text.push_str(&styles.paint(category, &part));
            } else {
                text.push_str(&part);
            }
        }
        Ok(text)
    }
}

/// Depth as a Lua integer; anything past `i64::MAX` is as good as unbounded.
fn depth_arg(depth: usize) -> i64 {
    i64::try_from(depth).unwrap_or(i64::MAX)
}
