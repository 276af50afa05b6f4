// Licensed under the Apache-2.0 license

use log::debug;

use crate::error::ImageError;

/// Linker symbol marking the first byte of the application flash region.
pub const APP_START_SYMBOL: &str = "__flash_app_start__";
/// Linker symbol marking the last byte (inclusive) of the application flash region.
pub const APP_END_SYMBOL: &str = "__flash_app_end__";

/// The two bounds of the application flash region, as the textual values the
/// layout symbols were assigned (`0x08008000`, `32768`, ...).
///
/// Extracting the values from a linker script is the caller's job; a bound the
/// caller could not find is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutBounds {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl LayoutBounds {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    pub fn from_addresses(start: u64, end: u64) -> Self {
        Self::new(format!("{start:#x}"), format!("{end:#x}"))
    }

    /// Resolves the capacity of the region: `end - start + 1`.
    pub fn resolve(&self) -> Result<usize, ImageError> {
        let start = parse_bound(APP_START_SYMBOL, self.start.as_deref())?;
        let end = parse_bound(APP_END_SYMBOL, self.end.as_deref())?;
        if end < start {
            return Err(ImageError::InvalidLayout(format!(
                "{APP_END_SYMBOL} ({end:#x}) is below {APP_START_SYMBOL} ({start:#x})"
            )));
        }
        let capacity = usize::try_from(end - start + 1).map_err(|_| {
            ImageError::InvalidLayout(format!(
                "region {start:#x}..={end:#x} does not fit in memory"
            ))
        })?;
        debug!("Layout {start:#x}..={end:#x} resolves to a capacity of {capacity} bytes");
        Ok(capacity)
    }
}

fn parse_bound(symbol: &str, value: Option<&str>) -> Result<u64, ImageError> {
    let value = value
        .map(str::trim)
        .ok_or_else(|| ImageError::InvalidLayout(format!("{symbol} is not defined")))?;
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|_| {
        ImageError::InvalidLayout(format!("{symbol} = {value:?} is not a numeric address"))
    })
}
