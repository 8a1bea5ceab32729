use anyhow::Result;
use std::path::Path;

use cocoon_core::config::CocoonConfig;
use cocoon_core::store::SqliteKeyStore;

pub fn run(base_dir: &Path) -> Result<()> {
    println!("Initializing Cocoon in {}", base_dir.display());

    std::fs::create_dir_all(base_dir)?;

    let config_path = CocoonConfig::default_path(base_dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let config = CocoonConfig::default_config(base_dir);
        config.save(&config_path)?;
        println!("Created config: {}", config_path.display());
    }

    let config = CocoonConfig::load(&config_path)?;
    let db_path = Path::new(&config.cocoon.db_path);
    let _store = SqliteKeyStore::open(db_path)?;
    println!("Initialized key database: {}", db_path.display());

    println!("\nCocoon initialized. Next steps:");
    println!("  1. Run `cocoon key` to provision your first key");
    println!("  2. Run `cocoon backup` and keep the output somewhere safe");

    Ok(())
}
