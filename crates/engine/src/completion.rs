//! Name completion against a context's bindings.

use std::collections::BTreeSet;

use mlua::{Table, Value};

use crate::context::Context;
use crate::error::Result;

impl Context {
    /// Candidates for `prefix`, sorted.
    ///
    /// A plain prefix completes user bindings (plus built-ins when they are
    /// visible). A dotted prefix walks tables: `string.up` completes to
    /// `string.upper`.
    pub fn complete(&self, prefix: &str) -> Result<Vec<String>> {
        match prefix.rsplit_once('.') {
            Some((path, partial)) => self.complete_field(path, partial),
            None => self.complete_name(prefix),
        }
    }

    fn complete_name(&self, prefix: &str) -> Result<Vec<String>> {
        let helpers = self.helpers()?;
        let entities = self.get_entities()?;
        let scope = if self.options().builtins_visible {
            let builtins = helpers.filter(&self.environment().globals(), self.environment().builtins(), true)?;
            helpers.combine(vec![builtins, entities])?
        } else {
            entities
        };
        Ok(helpers
            .names(&scope)?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    fn complete_field(&self, path: &str, partial: &str) -> Result<Vec<String>> {
        let Some(table) = self.resolve(path)? else {
            return Ok(Vec::new());
        };
        let mut fields = BTreeSet::new();
        for pair in table.pairs::<Value, Value>() {
            let (key, _) = pair?;
            if let Value::String(key) = key {
                let key = key.to_string_lossy().to_string();
                if key.starts_with(partial) {
                    fields.insert(format!("{path}.{key}"));
                }
            }
        }
        Ok(fields.into_iter().collect())
    }

    /// Follow a dotted path from the top level; `None` unless it ends on a table.
    fn resolve(&self, path: &str) -> Result<Option<Table>> {
        let mut current = self.environment().globals();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Ok(None);
            }
            match current.raw_get::<Value>(segment)? {
                Value::Table(next) => current = next,
                _ => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}
