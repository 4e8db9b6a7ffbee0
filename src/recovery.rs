//! Room recovery snapshots
//!
//! On shutdown the server can write every live room's attributes to
//! `rooms.json` under the configured recovery location; the next start
//! recreates those rooms. Users and connections are never persisted.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::AppError;

/// One room's persisted attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room type name
    pub t: String,
    /// Private
    pub p: bool,
    /// Owner
    pub o: String,
    /// Max users, 0 = unbounded
    pub m: usize,
    /// Invite list
    #[serde(default)]
    pub i: Vec<String>,
    /// Room variables
    #[serde(default)]
    pub v: HashMap<String, Value>,
}

/// Room name → snapshot, ordered for stable files
pub type RoomsState = BTreeMap<String, RoomSnapshot>;

pub fn save(path: &Path, state: &RoomsState) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(state)?;
    fs::write(path, json)?;
    info!(path = %path.display(), rooms = state.len(), "Saved room recovery file");
    Ok(())
}

/// Read a recovery file; a missing file is an empty state
pub fn load(path: &Path) -> Result<RoomsState, AppError> {
    if !path.exists() {
        debug!(path = %path.display(), "No room recovery file");
        return Ok(RoomsState::new());
    }
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
