//! `contextloop status`: show the active configuration.

use contextloop_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let profile = config.active_profile()?;
    let tools = contextloop_tools::default_registry()?;

    println!("contextloop status");
    println!("==================");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!(
        "  Workspace:      {}{}",
        config.workspace.root.display(),
        if config.workspace.root.is_dir() { "" } else { " (missing)" }
    );
    println!("  Model:          {} ({})", profile.model_id, profile.provider);
    println!(
        "  Context:        {} tokens, {} reserved for output",
        profile.context_limit, profile.reserved_output
    );
    println!(
        "  Watermarks:     low {:.2} / high {:.2}, {} protected exchanges",
        config.context.low_watermark, config.context.high_watermark, config.context.protected_exchanges
    );
    println!(
        "  Agent limits:   {} iterations, {} model attempts, {}s tool timeout",
        config.agent.max_iterations, config.agent.max_model_attempts, config.agent.tool_timeout_secs
    );
    println!("  Tools:          {}", tools.names().join(", "));
    println!(
        "  API key:        {}",
        if config.has_api_key() { "configured" } else { "missing" }
    );

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file; run `contextloop onboard` first");
    }

    Ok(())
}
