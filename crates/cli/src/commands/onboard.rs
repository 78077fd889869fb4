//! `contextloop onboard`: first-time setup.

use contextloop_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let workspace_dir = AppConfig::default().workspace.root;

    println!("contextloop: first-time setup");
    println!("=============================\n");

    if config_dir.exists() {
        println!("  Config directory exists: {}", config_dir.display());
    } else {
        std::fs::create_dir_all(&config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    }

    if !workspace_dir.exists() {
        std::fs::create_dir_all(&workspace_dir)?;
        println!("  Created workspace directory: {}", workspace_dir.display());
    }

    if config_path.exists() {
        println!("\n  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
        println!("\n  Next steps:");
        println!("   1. Set CONTEXTLOOP_API_KEY or add api_key to {}", config_path.display());
        println!("   2. Pick a model with `active_model` (see `contextloop models`)");
        println!("   3. Run: contextloop agent\n");
    }

    Ok(())
}
