// Licensed under the Apache-2.0 license

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use dfu_builder::{LayoutBounds, APP_END_SYMBOL, APP_START_SYMBOL};

/// Value assigned to `symbol` by a `symbol = value;` statement.
fn symbol_value(script: &str, symbol: &str) -> Option<String> {
    script.match_indices(symbol).find_map(|(pos, _)| {
        let rest = script[pos + symbol.len()..].trim_start();
        let rest = rest.strip_prefix('=')?;
        let end = rest.find(';')?;
        Some(rest[..end].trim().to_string())
    })
}

/// Reads the application region bounds from a linker script.
pub fn parse_layout_bounds(script: &str) -> LayoutBounds {
    LayoutBounds {
        start: symbol_value(script, APP_START_SYMBOL),
        end: symbol_value(script, APP_END_SYMBOL),
    }
}

pub fn read_layout_bounds(path: &Path) -> Result<LayoutBounds> {
    let script = fs::read_to_string(path)
        .with_context(|| format!("Failed to read linker script {}", path.display()))?;
    Ok(parse_layout_bounds(&script))
}
