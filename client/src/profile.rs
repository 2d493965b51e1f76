//! Player name persisted between runs.
//!
//! The profile is a JSON object file. Only [`PLAYER_NAME_KEY`] is read or
//! written; other keys are kept as they are.

use crate::error::ProfileError;
use log::{debug, info};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const PLAYER_NAME_KEY: &str = "playerName";

/// Reads the stored name, falling back to `fallback`, and writes the result
/// straight back so the next start sees it.
pub fn load_player_name(path: &Path, fallback: Option<&str>) -> Result<String, ProfileError> {
    let mut profile = read_profile(path)?;

    let stored = profile
        .get(PLAYER_NAME_KEY)
        .and_then(Value::as_str)
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string);
    let name = match (stored, fallback) {
        (Some(name), _) => {
            debug!("Using stored player name {}", name);
            name
        }
        (None, Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return Err(ProfileError::MissingName),
    };

    profile.insert(PLAYER_NAME_KEY.to_string(), Value::String(name.clone()));
    write_profile(path, &profile)?;
    info!("Playing as {}", name);
    Ok(name)
}

fn read_profile(path: &Path) -> Result<Map<String, Value>, ProfileError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(&raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(ProfileError::NotAnObject),
    }
}

fn write_profile(path: &Path, profile: &Map<String, Value>) -> Result<(), ProfileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(profile)?)?;
    Ok(())
}
