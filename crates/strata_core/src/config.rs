//! Configuration types for strata.
//!
//! This module provides the [`Config`] struct which stores workspace location
//! and tuning knobs for the reconciler, the task queue and the loader.
//! Configuration is persisted as TOML (typically at
//! `~/.config/strata/config.toml` on Unix systems).
//!
//! # Example
//!
//! ```no_run
//! use strata_core::config::Config;
//!
//! let config = Config::load()?;
//! assert_eq!(config.staleness_tolerance_minutes, 10);
//! # Ok::<(), strata_core::StrataError>(())
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::fs::FileSystem;
use crate::sql::KeywordSources;
use crate::workspace::WorkspaceLayout;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace root holding `data/`, `temp/` and `corrupted/`
    pub workspace_dir: PathBuf,

    /// How far the queryable index may lag the identity index before a tree
    /// is re-indexed
    pub staleness_tolerance_minutes: i64,

    /// Period of the background queue flusher
    pub flush_interval_ms: u64,

    /// Delay between an on-disk repair and the user notice about it
    pub reload_notice_delay_ms: u64,

    /// Budget used when a window request does not carry one
    pub default_window_size: usize,

    pub search: SearchConfig,

    pub editor: EditorConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Case-sensitive keyword highlighting
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Turn plain-text mentions of known names into virtual block refs
    pub virtual_block_ref: bool,

    /// Comma-separated keywords never turned into virtual refs; `\,` escapes a comma
    pub virtual_block_ref_exclude: String,

    pub virtual_ref_name: bool,
    pub virtual_ref_alias: bool,
    pub virtual_ref_anchor: bool,
    pub virtual_ref_doc: bool,

    /// Longest anchor text filled into dynamic block refs, in characters
    pub dynamic_anchor_max_len: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            virtual_block_ref: false,
            virtual_block_ref_exclude: String::new(),
            virtual_ref_name: true,
            virtual_ref_alias: true,
            virtual_ref_anchor: true,
            virtual_ref_doc: true,
            dynamic_anchor_max_len: 64,
        }
    }
}

impl EditorConfig {
    pub fn keyword_sources(&self) -> KeywordSources {
        KeywordSources {
            name: self.virtual_ref_name,
            alias: self.virtual_ref_alias,
            anchor: self.virtual_ref_anchor,
            doc: self.virtual_ref_doc,
        }
    }

    /// Parsed exclusion list.
    pub fn excluded_keywords(&self) -> Vec<String> {
        const SEP: &str = "__comma@sep__";
        if self.virtual_block_ref_exclude.trim().is_empty() {
            return Vec::new();
        }
        self.virtual_block_ref_exclude
            .replace("\\,", SEP)
            .split(',')
            .map(|e| e.replace(SEP, ","))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        let workspace_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata");

        Self {
            workspace_dir,
            staleness_tolerance_minutes: 10,
            flush_interval_ms: 2000,
            reload_notice_delay_ms: 3000,
            default_window_size: 64,
            search: SearchConfig::default(),
            editor: EditorConfig::default(),
        }
    }
}

impl Config {
    /// A default config pointing at `workspace_dir`.
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            ..Self::default()
        }
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(self.workspace_dir.clone())
    }

    /// Load config from a specific path.
    pub fn load_from<FS: FileSystem>(fs: &FS, path: &Path) -> Result<Self> {
        let contents = fs
            .read_to_string(path)
            .map_err(|e| StrataError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to<FS: FileSystem>(&self, fs: &FS, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs.create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs.write_file(path, &contents)
            .map_err(|e| StrataError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(())
    }

    /// Get the config file path (~/.config/strata/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("strata").join("config.toml"))
    }

    /// Load config from default location, or return default if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path()
            && path.exists()
        {
            let contents = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&contents)?;
            return Ok(config);
        }

        Ok(Config::default())
    }

    /// Save config to default location
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or(StrataError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFileSystem;

    #[test]
    fn test_partial_toml_uses_field_defaults() {
        let config: Config = toml::from_str(
            r#"
            workspace_dir = "/tmp/ws"

            [editor]
            virtual_block_ref = true
            "#,
        )
        .unwrap();
        assert_eq!(config.workspace_dir, PathBuf::from("/tmp/ws"));
        assert_eq!(config.staleness_tolerance_minutes, 10);
        assert!(config.editor.virtual_block_ref);
        assert!(config.editor.virtual_ref_doc);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let fs = InMemoryFileSystem::new();
        let path = Path::new("/cfg/strata/config.toml");
        let mut config = Config::new("/ws");
        config.flush_interval_ms = 50;
        config.save_to(&fs, path).unwrap();

        let loaded = Config::load_from(&fs, path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_excluded_keywords_honor_escaped_commas() {
        let editor = EditorConfig {
            virtual_block_ref_exclude: "a,b\\,c, d".into(),
            ..Default::default()
        };
        assert_eq!(editor.excluded_keywords(), vec!["a", "b,c", " d"]);
        assert!(EditorConfig::default().excluded_keywords().is_empty());
    }
}
