//! Locating and layering config files.
//!
//! Layers, lowest precedence first:
//! 1. user file: `$BRUNO_MEMORY_CONFIG_DIR/config.toml`, else
//!    `<platform config dir>/bruno-memory/config.toml`
//! 2. project file: `<project dir>/bruno-memory.toml`
//! 3. `BRUNO_MEMORY_DATABASE`, which replaces only the database target
//!
//! Files are merged per top-level key, so a project file only needs the keys
//! it changes.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, SqliteConfig};

const APP_DIR: &str = "bruno-memory";
const USER_FILE: &str = "config.toml";
const PROJECT_FILE: &str = "bruno-memory.toml";

/// Overrides the directory searched for the user file.
pub const CONFIG_DIR_ENV: &str = "BRUNO_MEMORY_CONFIG_DIR";

/// Overrides the database target after all files are merged.
pub const DATABASE_ENV: &str = "BRUNO_MEMORY_DATABASE";

/// Which layer a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
    Environment,
}

/// One place that was consulted during discovery.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    /// File path; `None` for the environment layer.
    pub path: Option<PathBuf>,
    pub loaded: bool,
}

/// The merged config and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SqliteConfig,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Layers that contributed at least one value.
    pub fn applied_layers(&self) -> Vec<Layer> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.layer)
            .collect()
    }
}

/// Inputs to discovery. `Default` reads nothing from the environment;
/// [`DiscoveryOptions::from_env`] does.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub project_dir: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

impl DiscoveryOptions {
    pub fn from_env(project_dir: Option<&Path>) -> Self {
        Self {
            project_dir: project_dir.map(Path::to_path_buf),
            config_dir: std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from),
            database: std::env::var_os(DATABASE_ENV).map(PathBuf::from),
        }
    }

    fn user_file(&self) -> Option<PathBuf> {
        match &self.config_dir {
            Some(dir) => Some(dir.join(USER_FILE)),
            None => dirs::config_dir().map(|d| d.join(APP_DIR).join(USER_FILE)),
        }
    }

    fn project_file(&self) -> PathBuf {
        match &self.project_dir {
            Some(dir) => dir.join(PROJECT_FILE),
            None => PathBuf::from(PROJECT_FILE),
        }
    }
}

/// Discover config using the process environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(&DiscoveryOptions::from_env(project_dir))
}

/// Discover config from explicit inputs.
pub fn load_config_with_options(options: &DiscoveryOptions) -> Result<LoadedConfig> {
    let mut merged = toml::Table::new();
    let mut sources = Vec::new();

    if let Some(path) = options.user_file() {
        sources.push(merge_file(&mut merged, Layer::User, path)?);
    }
    sources.push(merge_file(&mut merged, Layer::Project, options.project_file())?);

    let mut config: SqliteConfig = toml::Value::Table(merged).try_into()?;
    sources.push(ConfigSource {
        layer: Layer::Environment,
        path: None,
        loaded: options.database.is_some(),
    });
    if let Some(database) = &options.database {
        config.database = database.clone();
    }

    config.validate()?;
    Ok(LoadedConfig { config, sources })
}

/// Read and validate a single file, without layering.
pub fn load_config_file(path: &Path) -> Result<SqliteConfig> {
    SqliteConfig::from_toml(&read(path)?)
}

/// Write `config` to `path`, creating missing parent directories.
pub fn save_config(config: &SqliteConfig, path: &Path) -> Result<()> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, config.to_toml()?).map_err(write_err)
}

/// The user-level file discovery would consult.
pub fn user_config_path() -> Option<PathBuf> {
    DiscoveryOptions::from_env(None).user_file()
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn merge_file(merged: &mut toml::Table, layer: Layer, path: PathBuf) -> Result<ConfigSource> {
    let loaded = path.is_file();
    if loaded {
        let table: toml::Table = toml::from_str(&read(&path)?)?;
        merged.extend(table);
    }
    Ok(ConfigSource {
        layer,
        path: Some(path),
        loaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn options(user: &TempDir, project: &TempDir) -> DiscoveryOptions {
        DiscoveryOptions {
            project_dir: Some(project.path().to_path_buf()),
            config_dir: Some(user.path().to_path_buf()),
            database: None,
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "database = \"/var/lib/bruno/memory.db\"\nenable_fts = false\n",
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.database(), Path::new("/var/lib/bruno/memory.db"));
        assert!(!config.fts_enabled());
    }

    #[test]
    fn test_load_config_file_missing() {
        let dir = TempDir::new().unwrap();
        let err = load_config_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_config_file_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "timeout = 0.0\n").unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "timeout", .. }));
    }

    #[test]
    fn test_project_layer_overrides_user_layer() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(
            user.path().join(USER_FILE),
            "database = \"user.db\"\ntimeout = 5.0\n",
        )
        .unwrap();
        fs::write(project.path().join(PROJECT_FILE), "database = \"project.db\"\n").unwrap();

        let loaded = load_config_with_options(&options(&user, &project)).unwrap();

        assert_eq!(loaded.config.database(), Path::new("project.db"));
        assert_eq!(loaded.config.backend.timeout, 5.0);
        assert_eq!(loaded.applied_layers(), [Layer::User, Layer::Project]);
    }

    #[test]
    fn test_database_override_wins() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        fs::write(project.path().join(PROJECT_FILE), "database = \"project.db\"\n").unwrap();

        let mut opts = options(&user, &project);
        opts.database = Some(PathBuf::from(":memory:"));
        let loaded = load_config_with_options(&opts).unwrap();

        assert!(loaded.config.is_in_memory());
        assert_eq!(loaded.applied_layers(), [Layer::Project, Layer::Environment]);
    }

    #[test]
    fn test_no_files_yields_defaults() {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        let loaded = load_config_with_options(&options(&user, &project)).unwrap();

        assert_eq!(loaded.config, SqliteConfig::default());
        assert!(loaded.applied_layers().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = SqliteConfig::in_memory().with_fts(false);

        save_config(&config, &path).unwrap();
        assert_eq!(load_config_file(&path).unwrap(), config);
    }
}
