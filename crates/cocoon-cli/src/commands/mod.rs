pub mod backup;
pub mod config;
pub mod decrypt;
pub mod encrypt;
pub mod history;
pub mod init;
pub mod key;
pub mod restore;
pub mod rotate;

use anyhow::{Context as _, Result};
use std::path::PathBuf;

use cocoon_core::config::CocoonConfig;
use cocoon_keys::factory::{self, KeySession};

/// Global options shared by every command.
pub struct Context {
    pub base_dir: PathBuf,
    pub user: String,
    pub kms_token: Option<String>,
}

impl Context {
    pub fn load_config(&self) -> Result<CocoonConfig> {
        let path = CocoonConfig::default_path(&self.base_dir);
        CocoonConfig::load(&path).with_context(|| {
            format!("Could not load {} (run `cocoon init` first)", path.display())
        })
    }

    pub async fn open_session(&self) -> Result<KeySession> {
        let config = self.load_config()?;
        Ok(factory::open_session(&config, self.kms_token.clone()).await?)
    }
}
