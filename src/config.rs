use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MemoError, Result};

const DEFAULT_DB_NAME: &str = "memo.db";
const DEFAULT_CONFIG_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Page that holds all practice data and the priority ranking.
    pub data_page_title: String,
    /// Decks to build the daily queue from, in round-robin order.
    pub tags: Vec<String>,
    /// Cards per day across all tags. 0 means no limit.
    pub daily_limit: usize,
    /// Priority (percent) given to newly discovered cards.
    pub default_priority: f64,
    pub shuffle_cards: bool,
    pub debounce_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_page_title: "roam/memo".to_string(),
            tags: vec!["memo".to_string()],
            daily_limit: 0,
            default_priority: 70.0,
            shuffle_cards: false,
            debounce_ms: 1000,
        }
    }
}

impl Settings {
    /// Load settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| MemoError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(raw).map_err(|e| MemoError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.default_priority) {
            return Err(MemoError::InvalidPriority(self.default_priority));
        }
        if self.tags.is_empty() {
            return Err(MemoError::Config("at least one tag is required".into()));
        }
        if self.data_page_title.trim().is_empty() {
            return Err(MemoError::Config("data_page_title cannot be empty".into()));
        }
        Ok(())
    }
}

fn app_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memo");

    std::fs::create_dir_all(&dir).ok();
    dir
}

pub fn db_path() -> PathBuf {
    if let Ok(path) = std::env::var("MEMO_DB") {
        return PathBuf::from(path);
    }
    app_dir().join(DEFAULT_DB_NAME)
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MEMO_CONFIG") {
        return PathBuf::from(path);
    }
    app_dir().join(DEFAULT_CONFIG_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "daily_limit = 30").unwrap();
        writeln!(file, "tags = [\"spanish\", \"rust\"]").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.daily_limit, 30);
        assert_eq!(settings.tags, vec!["spanish", "rust"]);
        assert_eq!(settings.default_priority, 70.0);
        assert_eq!(settings.data_page_title, "roam/memo");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let result = Settings::from_toml("daily_limit = \"lots\"");
        assert!(matches!(result, Err(MemoError::Config(_))));
    }

    #[test]
    fn priority_out_of_range_rejected() {
        let result = Settings::from_toml("default_priority = 150.0");
        assert!(matches!(result, Err(MemoError::InvalidPriority(_))));
    }

    #[test]
    fn empty_tags_rejected() {
        let result = Settings::from_toml("tags = []");
        assert!(matches!(result, Err(MemoError::Config(_))));
    }
}
