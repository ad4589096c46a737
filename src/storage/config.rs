use std::path::{Path, PathBuf};

use relayget_core::fs_paths::AppPaths;
use relayget_core::models::settings::{AppSettings, Environment};

const SETTINGS_FILE: &str = "settings.json";

pub fn settings_path(paths: &dyn AppPaths) -> PathBuf {
    match std::env::var("RELAYGET_CONFIG") {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => paths.config_dir().join(SETTINGS_FILE),
    }
}

/// Reads settings from disk. A missing or unreadable file yields defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("[config] {} not found, using defaults", path.display());
            return AppSettings::default();
        }
        Err(e) => {
            tracing::warn!("[config] failed to read {}: {}", path.display(), e);
            return AppSettings::default();
        }
    };

    match serde_json::from_str::<AppSettings>(&raw) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("[config] {} is invalid ({}), using defaults", path.display(), e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Applies `PORT`, `RELAYGET_BIND` and `RELAYGET_ENV` on top of file settings.
pub fn apply_env_overrides<F>(settings: &mut AppSettings, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = var("PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) => settings.server.port = p,
            Err(_) => tracing::warn!("[config] ignoring invalid PORT '{}'", port),
        }
    }
    if let Some(bind) = var("RELAYGET_BIND").filter(|b| !b.trim().is_empty()) {
        settings.server.bind_address = bind.trim().to_string();
    }
    if let Some(mode) = var("RELAYGET_ENV") {
        match Environment::parse(&mode) {
            Some(env) => settings.environment.mode = Some(env),
            None => tracing::warn!("[config] ignoring invalid RELAYGET_ENV '{}'", mode),
        }
    }
}

/// Explicit mode wins; otherwise known hosting platforms select `hosted`.
pub fn detect_environment<F>(settings: &AppSettings, var: F) -> Environment
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(mode) = settings.environment.mode {
        return mode;
    }
    let on_render = var("RENDER").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
    let on_heroku = var("HEROKU_APP_NAME").is_some_and(|v| !v.is_empty());
    if on_render || on_heroku {
        Environment::Hosted
    } else {
        Environment::Local
    }
}
