//! Layered config loading with migration, validation, and an explicit cache.
//!
//! Config files are JSON. Layers are applied in order (global first, then
//! project), each one deep-merged over the previous. The merged document is
//! migrated to [`CURRENT_VERSION`], validated against the generated JSON
//! Schema, and deserialized into [`SweepConfig`].
//!
//! Problems never abort loading. An unreadable or unparsable layer is skipped
//! and an invalid key falls back to its default; each problem becomes a
//! warning in [`LoadedConfig::warnings`] so the host can surface it to the
//! operator without blocking.

use super::{CURRENT_VERSION, SweepConfig};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// File name looked up in each config directory.
pub const CONFIG_FILE_NAME: &str = "sweep.json";

/// Result of loading a set of config layers.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SweepConfig,
    /// Human-readable problems found while loading.
    pub warnings: Vec<String>,
    /// Layers that existed and were read.
    pub sources: Vec<PathBuf>,
}

/// Standard layer paths: the user config directory, then the project.
pub fn default_config_paths(project_dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("sweep").join(CONFIG_FILE_NAME));
    }
    paths.push(project_dir.join(".sweep").join(CONFIG_FILE_NAME));
    paths
}

/// Load, merge, migrate, and validate the given layers.
pub fn load_layers(paths: &[PathBuf]) -> LoadedConfig {
    let mut warnings = Vec::new();
    let mut sources = Vec::new();
    let mut merged = Value::Object(Map::new());

    for path in paths {
        if !path.exists() {
            continue;
        }
        match read_layer(path) {
            Ok(layer) => {
                let (layer, notes) = migrate(layer);
                for note in notes {
                    warnings.push(format!("{}: {note}", path.display()));
                }
                merge(&mut merged, layer);
                sources.push(path.clone());
            }
            Err(e) => warnings.push(e.to_string()),
        }
    }

    let config = validate(merged, &mut warnings);
    for warning in &warnings {
        warn!("[config] {warning}");
    }
    debug!("[config] loaded {} layer(s)", sources.len());

    LoadedConfig {
        config,
        warnings,
        sources,
    }
}

fn read_layer(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&raw).map_err(|e| Error::config(path, e.to_string()))?;
    if !value.is_object() {
        return Err(Error::config(path, "top-level value must be an object"));
    }
    Ok(value)
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; every other
/// value in `overlay` replaces the one in `base`.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Upgrade a config document to [`CURRENT_VERSION`].
///
/// Version 1 files used flat camelCase keys. Returns the migrated document
/// and a note for every key that was rewritten.
pub fn migrate(value: Value) -> (Value, Vec<String>) {
    let mut map = match value {
        Value::Object(map) => map,
        other => return (other, Vec::new()),
    };
    let version = map.get("version").and_then(Value::as_u64).unwrap_or(1);
    if version >= u64::from(CURRENT_VERSION) {
        return (Value::Object(map), Vec::new());
    }

    let mut notes = Vec::new();
    let mut rename = |map: &mut Map<String, Value>, from: &str, to: &str| {
        if let Some(v) = map.remove(from) {
            map.insert(to.to_string(), v);
            notes.push(format!("renamed legacy key `{from}` to `{to}`"));
        }
    };
    rename(&mut map, "protectedTools", "protected_tools");
    rename(&mut map, "protectedFilePatterns", "protected_file_patterns");
    rename(&mut map, "cacheSize", "cache_capacity");
    rename(&mut map, "maxCacheSize", "cache_capacity");
    rename(&mut map, "charsPerToken", "chars_per_token");

    if let Some(tp) = map.remove("turnProtection") {
        let migrated = match tp {
            Value::Number(n) => {
                let turns = n.as_u64().unwrap_or(0);
                serde_json::json!({"enabled": turns > 0, "turns": turns})
            }
            Value::Bool(enabled) => serde_json::json!({ "enabled": enabled }),
            other => other,
        };
        map.insert("turn_protection".into(), migrated);
        notes.push("migrated legacy key `turnProtection`".into());
    }

    for (legacy, strategy) in [
        ("deduplication", "deduplication"),
        ("truncation", "truncation"),
        ("pruneThinking", "reasoning_compression"),
        ("supersede", "supersede"),
    ] {
        if let Some(Value::Bool(enabled)) = map.get(legacy).cloned() {
            map.remove(legacy);
            let strategies = map
                .entry("strategies")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(strategies) = strategies {
                strategies.insert(strategy.into(), serde_json::json!({ "enabled": enabled }));
            }
            notes.push(format!("moved legacy flag `{legacy}` under `strategies.{strategy}`"));
        }
    }

    map.insert("version".into(), Value::from(CURRENT_VERSION));
    (Value::Object(map), notes)
}

/// Validate against the schema, drop offending top-level keys, and
/// deserialize. Falls back to defaults if the document still doesn't parse.
fn validate(mut merged: Value, warnings: &mut Vec<String>) -> SweepConfig {
    let schema = SweepConfig::json_schema();
    if let Ok(validator) = jsonschema::validator_for(&schema) {
        let mut bad_keys: Vec<String> = Vec::new();
        for error in validator.iter_errors(&merged) {
            let pointer = error.instance_path().to_string();
            warnings.push(format!("invalid value at `{pointer}`: {error}"));
            if let Some(key) = pointer.trim_start_matches('/').split('/').next()
                && !key.is_empty()
                && !bad_keys.iter().any(|k| k == key)
            {
                bad_keys.push(key.to_string());
            }
        }
        if let Value::Object(map) = &mut merged {
            for key in &bad_keys {
                map.remove(key);
                warnings.push(format!("using default for `{key}`"));
            }
        }
    }

    match serde_json::from_value::<SweepConfig>(merged) {
        Ok(mut config) => {
            config.version = CURRENT_VERSION;
            config
        }
        Err(e) => {
            warnings.push(format!("falling back to default config: {e}"));
            SweepConfig::default()
        }
    }
}

// ── ConfigCache ───────────────────────────────────────────────────

/// Loaded configs keyed by their resolved layer paths.
///
/// An entry is reloaded when any layer's modification time changes, a layer
/// appears, or a layer disappears. Owned by the caller and passed by
/// reference; there is no process-wide instance.
#[derive(Debug, Default)]
pub struct ConfigCache {
    entries: HashMap<Vec<PathBuf>, CachedConfig>,
}

#[derive(Debug)]
struct CachedConfig {
    stamps: Vec<Option<SystemTime>>,
    loaded: LoadedConfig,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the config for `paths`, loading it if absent or stale.
    pub fn get(&mut self, paths: &[PathBuf]) -> &LoadedConfig {
        let key: Vec<PathBuf> = paths.iter().map(|p| resolve(p)).collect();
        let stamps: Vec<Option<SystemTime>> = key.iter().map(|p| modified(p)).collect();

        let stale = self
            .entries
            .get(&key)
            .is_none_or(|cached| cached.stamps != stamps);
        if stale {
            debug!("[config] (re)loading {} path(s)", key.len());
            let loaded = load_layers(&key);
            self.entries
                .insert(key.clone(), CachedConfig { stamps, loaded });
        }
        &self.entries[&key].loaded
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
