pub mod error;
pub mod settings;

pub use error::*;
pub use settings::{AllocatorSettings, PollSettings, RetrySettings, Settings};

use std::path::{Path, PathBuf};

const CONFIG_ENV: &str = "SETTLEFLOW_CONFIG_PATH";
const CANDIDATES: [&str; 3] = ["settleflow.local.yaml", "settleflow.yaml", ".settleflow.yaml"];

/// settleflowの設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("settleflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the settings file
///
/// Search order:
/// 1. `SETTLEFLOW_CONFIG_PATH` environment variable
/// 2. Current directory: settleflow.local.yaml, settleflow.yaml, .settleflow.yaml
/// 3. ~/.config/settleflow/settleflow.yaml
pub fn find_settings_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("settleflow").join("settleflow.yaml");
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

/// Parse and validate a settings file
pub fn load_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.validate()?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings from the first discovered file, or defaults when none exists
pub fn load_settings() -> Result<Settings> {
    match find_settings_file()? {
        Some(path) => load_from(path),
        None => {
            tracing::debug!("No settings file found, using defaults");
            Ok(Settings::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("settleflow"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_settings_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("settleflow.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let found = find_settings_file().unwrap().unwrap();
        assert!(found.ends_with("settleflow.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_local_file_takes_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();

        fs::write(temp_dir.path().join("settleflow.yaml"), "{}").unwrap();
        fs::write(temp_dir.path().join("settleflow.local.yaml"), "{}").unwrap();
        std::env::set_current_dir(&temp_dir).unwrap();

        let found = find_settings_file().unwrap().unwrap();
        assert!(found.ends_with("settleflow.local.yaml"));

        std::env::set_current_dir(original_dir).unwrap();
    }

    #[test]
    #[serial]
    fn test_env_var_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "allocator:\n  max_attempts: 9\n").unwrap();

        unsafe {
            std::env::set_var(CONFIG_ENV, config_path.to_str().unwrap());
        }

        let settings = load_settings().unwrap();
        assert_eq!(settings.allocator.max_attempts, 9);

        unsafe {
            std::env::remove_var(CONFIG_ENV);
        }
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "allocator:\n  max_attempts: 0\n").unwrap();

        assert!(matches!(
            load_from(&path),
            Err(ConfigError::Invalid { field: "allocator.max_attempts", .. })
        ));
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.yaml");
        fs::write(&path, "poll: [not, a, map]\n").unwrap();

        match load_from(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }
}
