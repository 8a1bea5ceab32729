use anyhow::Result;
use std::path::Path;

use cocoon_core::config::CocoonConfig;

pub fn run(base_dir: &Path) -> Result<()> {
    let config_path = CocoonConfig::default_path(base_dir);
    let config = CocoonConfig::load(&config_path)?;

    println!("Config: {}", config_path.display());
    println!();
    println!("  DB path:         {}", config.cocoon.db_path);
    println!("  KDF iterations:  {}", config.cocoon.kdf_iterations);
    println!();

    if config.kms.enabled {
        println!("  KMS:             enabled");
        println!("  Hybrid mode:     {}", config.kms.hybrid_mode);
        println!("  App scope:       {}", config.kms.app_scope);
        println!(
            "  Endpoint:        {}",
            config.kms.endpoint.as_deref().unwrap_or("-")
        );
        println!("  Timeout:         {}s", config.kms.timeout_secs);
    } else {
        println!("  KMS:             disabled (keys are local to this device)");
        println!();
        println!("  To use a KMS, add to {}:", config_path.display());
        println!("  [kms]");
        println!("  enabled = true");
        println!("  endpoint = \"https://kms.example.com\"");
    }

    Ok(())
}
