//! Document loading
//!
//! Loading is two-phase. The file is parsed into an untyped, order-preserving
//! tree (TOML by default, JSON for `.json` paths), then
//! [`crate::core::validate::validate`] turns the tree into a typed
//! [`ConfigDocument`]. A file that cannot be read or parsed is a load error;
//! a parsed file with semantic problems is a validation error listing every
//! problem at once.

use crate::core::document::ConfigDocument;
use crate::core::error::{Error, Result};
use crate::core::validate::validate;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/yarp/config.toml";
pub const CONFIG_ENV: &str = "YARP_CONFIG";

/// Document path: explicit argument, then `YARP_CONFIG`, then the default
pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map(Path::to_path_buf).unwrap_or_else(|| {
        std::env::var_os(CONFIG_ENV)
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
    })
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Parses document text into a tree without validating it.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the text is not well-formed.
pub fn parse_str(text: &str, json: bool, origin: &str) -> Result<Value> {
    let parsed = if json {
        serde_json::from_str::<Value>(text).map_err(|e| e.to_string())
    } else {
        toml::from_str::<toml::Table>(text)
            .map_err(|e| e.message().to_string())
            .and_then(|table| serde_json::to_value(table).map_err(|e| e.to_string()))
    };
    parsed.map_err(|message| Error::Parse {
        path: origin.to_string(),
        message,
    })
}

/// Validates already-parsed text.
///
/// # Errors
///
/// Returns [`Error::Parse`] or [`Error::Validation`].
pub fn load_str(text: &str, json: bool, origin: &str) -> Result<ConfigDocument> {
    let tree = parse_str(text, json, origin)?;
    validate(&tree).map_err(Error::Validation)
}

/// Reads, parses and validates the document at `path`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read, [`Error::Parse`] if it
/// is malformed, [`Error::Validation`] if it violates the document rules.
pub fn load(path: &Path) -> Result<ConfigDocument> {
    debug!(path = %path.display(), "loading configuration");
    let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("cannot read {}: {e}", path.display()),
        ))
    })?;
    load_str(&text, is_json(path), &path.display().to_string())
}
