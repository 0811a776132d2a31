//! Loading and comment-preserving saving of `config.toml`.

use std::path::{Path, PathBuf};

use log::{info, warn};
use toml_edit::{value, DocumentMut, Item, Table};

use crate::config::{sanitize_config, Config};

pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .expect("Could not find config directory")
        .join("spectune")
        .join("config.toml")
}

/// Reads and sanitizes the config, creating a default file when missing.
/// A corrupt file degrades to defaults instead of failing startup.
pub fn load_or_create(path: &Path) -> Config {
    if !path.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, toml::to_string(&default_config).unwrap_or_default()) {
            warn!("Failed to write default config: {}", e);
        }
        return default_config;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read config, using defaults: {}", e);
            return Config::default();
        }
    };
    match toml::from_str::<Config>(&content) {
        Ok(config) => sanitize_config(config),
        Err(e) => {
            warn!("Failed to parse config, using defaults: {}", e);
            Config::default()
        }
    }
}

fn set_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn ensure_section_table(document: &mut DocumentMut, key: &str) {
    let root = document.as_table_mut();
    let should_replace = !matches!(root.get(key), Some(item) if item.is_table());
    if should_replace {
        root.insert(key, Item::Table(Table::new()));
    }
}

fn write_config_to_document(document: &mut DocumentMut, config: &Config) {
    ensure_section_table(document, "output");
    ensure_section_table(document, "analysis");
    ensure_section_table(document, "ui");

    let output = document["output"]
        .as_table_mut()
        .expect("output should be a table");
    set_preserving_decor(
        output,
        "sample_rate_hz",
        value(i64::from(config.output.sample_rate_hz)),
    );
    set_preserving_decor(
        output,
        "channel_count",
        value(i64::from(config.output.channel_count)),
    );

    let analysis = document["analysis"]
        .as_table_mut()
        .expect("analysis should be a table");
    set_preserving_decor(analysis, "fft_size", value(config.analysis.fft_size as i64));
    set_preserving_decor(
        analysis,
        "frame_interval_ms",
        value(config.analysis.frame_interval_ms as i64),
    );
    set_preserving_decor(
        analysis,
        "smoothing",
        value(f64::from(config.analysis.smoothing)),
    );
    set_preserving_decor(analysis, "min_db", value(f64::from(config.analysis.min_db)));
    set_preserving_decor(analysis, "max_db", value(f64::from(config.analysis.max_db)));

    let ui = document["ui"].as_table_mut().expect("ui should be a table");
    set_preserving_decor(ui, "window_width", value(i64::from(config.ui.window_width)));
    set_preserving_decor(
        ui,
        "window_height",
        value(i64::from(config.ui.window_height)),
    );
    set_preserving_decor(ui, "volume", value(f64::from(config.ui.volume)));
}

/// Writes the config back, keeping user comments and unknown keys intact.
pub fn save(path: &Path, config: &Config) {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let mut document = match existing.parse::<DocumentMut>() {
        Ok(document) => document,
        Err(e) => {
            warn!("Config file unparseable, rewriting from scratch: {}", e);
            DocumentMut::new()
        }
    };
    write_config_to_document(&mut document, config);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(path, document.to_string()) {
        warn!("Failed to save config: {}", e);
    }
}
