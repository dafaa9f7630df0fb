//! Display names and colors for contexts.
//!
//! Every context takes the next unused name from a shared pool and the next
//! color from a fixed palette. Both counters are shared by all contexts of a
//! process; tests and embedders can inject their own pool instead.

use std::collections::VecDeque;
use std::sync::Arc;

use crossterm::style::{Color, Stylize};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Names handed out in creation order.
pub const DEFAULT_NAMES: &[&str] = &[
    "Io", "Europa", "Ganymede", "Callisto", "Titan", "Rhea", "Iapetus", "Dione",
    "Tethys", "Enceladus", "Mimas", "Hyperion", "Phoebe", "Miranda", "Ariel",
    "Umbriel", "Titania", "Oberon", "Triton", "Nereid", "Charon", "Phobos", "Deimos",
];

/// Colors cycled through by creation order.
pub const DEFAULT_PALETTE: &[Color] = &[
    Color::Red,
    Color::Green,
    Color::Yellow,
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
];

/// Shared handle to a name pool.
pub type SharedNamePool = Arc<Mutex<NamePool>>;

static PROCESS_POOL: Lazy<SharedNamePool> = Lazy::new(|| Arc::new(Mutex::new(NamePool::default())));

/// A context's display identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub color: Color,
}

impl Identity {
    /// The name, colored when `colors` is on.
    pub fn display(&self, colors: bool) -> String {
        if colors {
            self.name.as_str().with(self.color).to_string()
        } else {
            self.name.clone()
        }
    }
}

/// Allocator for context names and palette colors.
#[derive(Debug, Clone)]
pub struct NamePool {
    seed_names: Vec<String>,
    names: VecDeque<String>,
    palette: Vec<Color>,
    color_index: usize,
    issued: usize,
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new(
            DEFAULT_NAMES.iter().map(|s| s.to_string()).collect(),
            DEFAULT_PALETTE.to_vec(),
        )
    }
}

impl NamePool {
    pub fn new(names: Vec<String>, palette: Vec<Color>) -> Self {
        let palette = if palette.is_empty() { vec![Color::Reset] } else { palette };
        Self {
            names: names.iter().cloned().collect(),
            seed_names: names,
            palette,
            // The first context takes the second palette slot.
            color_index: 1,
            issued: 0,
        }
    }

    /// The process-wide pool used when no pool is injected.
    pub fn process() -> SharedNamePool {
        PROCESS_POOL.clone()
    }

    pub fn shared(self) -> SharedNamePool {
        Arc::new(Mutex::new(self))
    }

    /// Take the next identity. Once the named pool runs dry, names fall back
    /// to `ctx<N>`.
    pub fn allocate(&mut self) -> Identity {
        self.issued += 1;
        let name = self
            .names
            .pop_front()
            .unwrap_or_else(|| format!("ctx{}", self.issued));
        let color = self.palette[self.color_index % self.palette.len()];
        self.color_index += 1;
        Identity { name, color }
    }

    /// Number of identities handed out since creation or the last reset.
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Restore the initial names and counters.
    pub fn reset(&mut self) {
        self.names = self.seed_names.iter().cloned().collect();
        self.color_index = 1;
        self.issued = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_in_order() {
        let mut pool = NamePool::new(vec!["a".into(), "b".into()], vec![Color::Red]);
        assert_eq!(pool.allocate().name, "a");
        assert_eq!(pool.allocate().name, "b");
        assert_eq!(pool.allocate().name, "ctx3");
        assert_eq!(pool.issued(), 3);
    }

    #[test]
    fn test_palette_cycles_from_second_slot() {
        let mut pool = NamePool::new(vec![], vec![Color::Red, Color::Green, Color::Blue]);
        let colors: Vec<Color> = (0..4).map(|_| pool.allocate().color).collect();
        assert_eq!(colors, vec![Color::Green, Color::Blue, Color::Red, Color::Green]);
    }

    #[test]
    fn test_reset() {
        let mut pool = NamePool::new(vec!["a".into()], vec![Color::Red, Color::Green]);
        pool.allocate();
        pool.allocate();
        pool.reset();
        let id = pool.allocate();
        assert_eq!(id.name, "a");
        assert_eq!(id.color, Color::Green);
        assert_eq!(pool.issued(), 1);
    }

    #[test]
    fn test_display_plain_and_colored() {
        let id = Identity { name: "Io".into(), color: Color::Cyan };
        assert_eq!(id.display(false), "Io");
        assert!(id.display(true).contains("Io"));
    }

    #[test]
    fn test_empty_palette_falls_back() {
        let mut pool = NamePool::new(vec![], vec![]);
        assert_eq!(pool.allocate().color, Color::Reset);
    }
}
