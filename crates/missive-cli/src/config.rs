use std::path::PathBuf;

use anyhow::{Context, Result};

use missive_types::api::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub page_size: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = get("MISSIVE_DB_PATH").unwrap_or_else(|| "missive.db".into());
        let page_size = match get("MISSIVE_PAGE_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("MISSIVE_PAGE_SIZE is not a number: '{}'", raw))?,
            None => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// `--db` on the command line wins over the environment.
    pub fn with_db_override(mut self, db: Option<PathBuf>) -> Self {
        if let Some(path) = db {
            self.db_path = path;
        }
        self
    }
}
