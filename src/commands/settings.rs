use crate::error::{IssueError, IssueResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_SCHEMA_VERSION: i64 = 2;
const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "issues.db";
const DEFAULT_DATA_DIR: &str = "./trialtrack-data";

pub const DATA_DIR_ENV: &str = "TRIALTRACK_DATA_DIR";
pub const PORT_ENV: &str = "TRIALTRACK_PORT";

/// Effective server configuration after defaults, migration and sanitizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,
    pub default_page_limit: i64,
    pub max_page_limit: i64,
    pub max_upload_bytes: usize,
    pub search_debounce_ms: u64,
    pub allowed_origins: Vec<String>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            default_page_limit: 20,
            max_page_limit: 100,
            max_upload_bytes: 5 * 1024 * 1024,
            search_debounce_ms: 2000,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

impl Settings {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Picks the data directory: explicit argument, then `TRIALTRACK_DATA_DIR`, then the default.
pub fn resolve_data_dir(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(DATA_DIR_ENV).ok())
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Loads `settings.json` from the data directory, creating or migrating it on
/// disk, and applies environment overrides.
pub fn load_settings(data_dir: &Path) -> IssueResult<Settings> {
    let raw = load_settings_from_disk(data_dir)?;
    let mut settings = settings_from_value(raw)?;
    settings.data_dir = data_dir.to_path_buf();

    if let Some(port) = std::env::var(PORT_ENV).ok().and_then(|p| p.parse::<u16>().ok()) {
        settings.port = port;
    }

    Ok(settings)
}

pub fn settings_from_value(raw: Value) -> IssueResult<Settings> {
    serde_json::from_value(raw)
        .map_err(|e| IssueError::validation(format!("Invalid settings.json: {e}")))
}

pub fn load_settings_from_disk(data_dir: &Path) -> IssueResult<Value> {
    ensure_data_dir(data_dir)?;
    let path = data_dir.join(SETTINGS_FILE);

    let original = if path.exists() {
        let raw = fs::read_to_string(&path).map_err(|source| IssueError::Io {
            context: "Failed to read settings.json",
            source,
        })?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            log::warn!("settings.json is not valid JSON ({e}); falling back to defaults");
            json!({})
        })
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(&path, &migrated)?;
        log::info!("Wrote settings to {}", path.display());
    }

    Ok(migrated)
}

fn ensure_data_dir(data_dir: &Path) -> IssueResult<()> {
    fs::create_dir_all(data_dir).map_err(|source| IssueError::Io {
        context: "Failed to create data directory",
        source,
    })
}

fn write_settings_file(path: &Path, settings: &Value) -> IssueResult<()> {
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| IssueError::validation(format!("Failed to serialize settings: {e}")))?;
    fs::write(path, raw).map_err(|source| IssueError::Io {
        context: "Failed to write settings.json",
        source,
    })
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 1 {
        // V1 stored the upload limit in megabytes.
        migrate_upload_limit_from_megabytes(&mut out);
    }

    if version < 2 {
        // V2 splits the page size into a default and a ceiling.
        rename_key(&mut out, "pageLimit", "defaultPageLimit");
    }

    deep_merge_defaults(&mut out, &defaults);
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "bindAddress": "127.0.0.1",
        "port": 3000,
        "defaultPageLimit": 20,
        "maxPageLimit": 100,
        "maxUploadBytes": 5 * 1024 * 1024,
        "searchDebounceMs": 2000,
        "allowedOrigins": ["http://localhost:5173"]
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn rename_key(target: &mut Value, from: &str, to: &str) {
    if let Some(obj) = target.as_object_mut() {
        if let Some(value) = obj.remove(from) {
            obj.entry(to.to_string()).or_insert(value);
        }
    }
}

fn migrate_upload_limit_from_megabytes(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };
    if let Some(megabytes) = obj.remove("maxUploadMb").and_then(|v| v.as_u64()) {
        obj.entry("maxUploadBytes".to_string())
            .or_insert(json!(megabytes * 1024 * 1024));
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    clamp_u64(obj, "port", 1, 65535, 3000);
    clamp_u64(obj, "maxPageLimit", 1, 1000, 100);
    let max_page_limit = obj.get("maxPageLimit").and_then(Value::as_u64).unwrap_or(100);
    clamp_u64(obj, "defaultPageLimit", 1, max_page_limit, 20.min(max_page_limit));
    clamp_u64(obj, "maxUploadBytes", 1024, 50 * 1024 * 1024, 5 * 1024 * 1024);
    clamp_u64(obj, "searchDebounceMs", 0, 10_000, 2000);

    ensure_string(obj, "bindAddress", "127.0.0.1");

    let origins: Vec<Value> = obj
        .get("allowedOrigins")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|origin| !origin.trim().is_empty())
                .map(|origin| json!(origin.trim()))
                .collect()
        })
        .unwrap_or_else(|| vec![json!("http://localhost:5173")]);
    obj.insert("allowedOrigins".to_string(), Value::Array(origins));
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn ensure_string(map: &mut Map<String, Value>, key: &str, default: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(value));
}
