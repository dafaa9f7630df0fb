// Settings + flags -> engine configuration

use crossterm::style::Color;
use moonrepl_config::Settings;
use moonrepl_engine::identity::{DEFAULT_NAMES, DEFAULT_PALETTE};
use moonrepl_engine::{Category, ContextOptions, NamePool, SharedNamePool, StyleTable};

/// Command-line flags that override settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub no_color: bool,
    pub depth: Option<usize>,
    pub show_builtins: bool,
}

pub fn context_options(settings: &Settings, overrides: &Overrides, tty: bool) -> ContextOptions {
    ContextOptions {
        builtins_visible: settings.show_builtins || overrides.show_builtins,
        hidden_names: settings.hidden.iter().cloned().collect(),
        colors: settings.colors && !overrides.no_color && tty,
        depth: overrides.depth.unwrap_or(settings.depth),
        instruction_limit: settings.instruction_limit,
    }
}

/// Default styles with the configured categories recolored.
pub fn styles(settings: &Settings) -> StyleTable {
    let mut styles = StyleTable::default();
    for (label, color) in &settings.styles {
        match (Category::from_label(label), parse_color(color)) {
            (Some(category), Some(color)) => styles.set(category, color),
            (None, _) => log::warn!("styles: unknown category {:?}", label),
            (_, None) => log::warn!("styles: unknown color {:?} for {}", color, label),
        }
    }
    styles
}

/// A private name pool when names or palette are configured.
pub fn name_pool(settings: &Settings) -> Option<SharedNamePool> {
    if settings.names.is_empty() && settings.palette.is_empty() {
        return None;
    }
    let names = if settings.names.is_empty() {
        DEFAULT_NAMES.iter().map(|s| s.to_string()).collect()
    } else {
        settings.names.clone()
    };
    let palette: Vec<Color> = settings
        .palette
        .iter()
        .filter_map(|name| {
            let color = parse_color(name);
            if color.is_none() {
                log::warn!("context.palette: unknown color {:?}", name);
            }
            color
        })
        .collect();
    let palette = if palette.is_empty() { DEFAULT_PALETTE.to_vec() } else { palette };
    Some(NamePool::new(names, palette).shared())
}

/// Parse a color name (`dark_grey`, `cyan`) or `#RRGGBB`.
pub fn parse_color(name: &str) -> Option<Color> {
    if let Some(hex) = name.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        return Some(Color::Rgb {
            r: ((value >> 16) & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: (value & 0xFF) as u8,
        });
    }
    Color::try_from(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("cyan"), Some(Color::Cyan));
        assert_eq!(parse_color("dark_grey"), Some(Color::DarkGrey));
        assert_eq!(parse_color("#336699"), Some(Color::Rgb { r: 0x33, g: 0x66, b: 0x99 }));
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("chartreuse-ish"), None);
    }

    #[test]
    fn test_flags_override_settings() {
        let settings = Settings { depth: 3, ..Settings::default() };
        let overrides = Overrides { no_color: true, depth: Some(5), show_builtins: true };
        let options = context_options(&settings, &overrides, true);
        assert_eq!(options.depth, 5);
        assert!(!options.colors);
        assert!(options.builtins_visible);

        let options = context_options(&settings, &Overrides::default(), false);
        assert_eq!(options.depth, 3);
        assert!(!options.colors, "no colors without a terminal");
    }

    #[test]
    fn test_styles_from_settings() {
        let mut settings = Settings::default();
        settings.styles.insert("String".into(), "red".into());
        settings.styles.insert("Bogus".into(), "red".into());
        let styles = styles(&settings);
        assert_eq!(styles.get(Category::String), Some(Color::Red));
    }

    #[test]
    fn test_name_pool_only_when_configured() {
        assert!(name_pool(&Settings::default()).is_none());
        let settings = Settings { names: vec!["alpha".into()], ..Settings::default() };
        let pool = name_pool(&settings).unwrap();
        assert_eq!(pool.lock().allocate().name, "alpha");
    }
}
