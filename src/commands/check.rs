use service_supervisor::config::Parser as ConfigParser;
use service_supervisor::modules::BUILTIN_SERVICE_TYPES;
use std::path::Path;

pub fn run_check(config_path: &Path) -> anyhow::Result<()> {
    println!("Validating {}...", config_path.display());

    let config = match ConfigParser::new().load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration failed to load");
            eprintln!("\nError: {}", e);
            return Err(e.into());
        }
    };

    let order = config.validate(BUILTIN_SERVICE_TYPES)?;

    println!("Configuration is valid\n");
    println!("Runlevel: {}", config.settings.runlevel);
    println!("Shutdown action: {}", config.settings.shutdown_action);
    println!("\nServices: {}", config.services.len());
    for (position, name) in order.iter().enumerate() {
        let service_type = config
            .service(name)
            .and_then(|s| s.service_type.as_deref())
            .unwrap_or("-");
        println!("  {:>3}. {} ({})", position + 1, name, service_type);
    }

    if !config.settings.blacklist.is_empty() {
        println!("\nBlacklisted: {}", config.settings.blacklist.join(", "));
    }
    Ok(())
}
