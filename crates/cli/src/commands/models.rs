//! `contextloop models`: list configured model profiles.

use contextloop_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = config.profile_registry()?;

    println!("Configured models");
    println!("=================");
    println!();
    println!(
        "    {:<28} {:<12} {:>10} {:>10} {:>6}",
        "ID", "PROVIDER", "CONTEXT", "RESERVED", "C/TOK"
    );
    for profile in registry.iter() {
        let marker = if profile.model_id == config.active_model { "*" } else { " " };
        println!(
            "  {marker} {:<28} {:<12} {:>10} {:>10} {:>6.1}",
            profile.model_id,
            profile.provider,
            profile.context_limit,
            profile.reserved_output,
            profile.chars_per_token,
        );
    }
    println!();
    println!("  * active (set `active_model` or CONTEXTLOOP_MODEL to switch)");

    Ok(())
}
