use std::path::Path;

use crate::config;

pub(crate) fn handle_validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load(path).map_err(|e| format!("configuration invalid: {e}"))?;

    println!("Configuration OK");
    println!(
        "window: {} to {}",
        config.window.start().format("%Y-%m-%dT%H:%M:%SZ"),
        config.window.end().format("%Y-%m-%dT%H:%M:%SZ")
    );
    for forge in &config.forges {
        println!(
            "forge {} ({}): {} username(s), {} repo(s), token {}",
            forge.identity.name,
            forge.identity.kind,
            forge.usernames.len(),
            forge.repos.len(),
            if forge.identity.token.is_some() {
                "configured"
            } else {
                "absent"
            }
        );
    }
    Ok(())
}
