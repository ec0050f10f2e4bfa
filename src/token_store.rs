use crate::config::Config;
use crate::error::Error;
use log::debug;
use std::fs;
use std::path::PathBuf;

#[cfg_attr(test, mockall::automock)]
pub trait TokenStore: Send + Sync + 'static {
    /// Returns the stored refresh token. A missing or empty file yields `None`.
    fn load(&self) -> Option<String>;

    /// Replaces the stored refresh token.
    fn save(&self, token: &str) -> Result<(), Error>;
}

/// Keeps the refresh token as a single line in a local file.
#[derive(Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(config: &Config) -> Self {
        FileTokenStore {
            path: config.refresh_token_path.clone(),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<String> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let token = contents.lines().next()?.trim();

        if token.is_empty() {
            return None;
        }

        Some(token.to_string())
    }

    fn save(&self, token: &str) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // A half written temp file never replaces the previous token.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, token)?;
        fs::rename(&staging, &self.path)?;

        debug!("refresh token saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(&test_config(temp_dir.path()));

        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_load_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        fs::write(&config.refresh_token_path, "").unwrap();

        let store = FileTokenStore::new(&config);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(&test_config(temp_dir.path()));

        store.save("first-token").unwrap();
        store.save("rotated-token").unwrap();

        assert_eq!(store.load(), Some("rotated-token".to_string()));
        assert!(!temp_dir.path().join("refresh.tmp").exists());
    }

    #[test]
    fn test_save_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path());
        config.refresh_token_path = temp_dir.path().join("refresh_token").join("refresh.txt");

        let store = FileTokenStore::new(&config);
        store.save("token").unwrap();

        assert_eq!(store.load(), Some("token".to_string()));
    }

    #[test]
    fn test_load_reads_first_line_only() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        fs::write(&config.refresh_token_path, "token-line\nsomething else\n").unwrap();

        let store = FileTokenStore::new(&config);
        assert_eq!(store.load(), Some("token-line".to_string()));
    }
}
