use std::collections::BTreeMap;
use std::sync::Arc;

use clap::ValueEnum;
use serde::Serialize;
use tally::run::enumerate;

use crate::commands::shared::{build_handles, select_forges};
use crate::config::Config;
use crate::progress::ProgressReporter;

/// Output format for discovery results.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    /// YAML shaped to paste into the config file (default)
    #[default]
    Yaml,
    /// JSON for machine consumption
    Json,
}

/// One forge's discovery result, shaped to drop into a config file.
#[derive(Debug, Serialize)]
struct ForgeDiscovery {
    usernames: Vec<String>,
    repos: Vec<String>,
}

pub(crate) async fn handle_discover(
    config: &Config,
    forges: &[String],
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = select_forges(config, forges)?;

    let reporter = Arc::new(ProgressReporter::new("Discovering"));
    let callback = reporter.as_callback();
    let handles = build_handles(&entries, Some(Arc::clone(&callback)))?;

    let (discovered, failures) = enumerate(
        &handles,
        config.window,
        &config.options,
        Some(callback.as_ref()),
    )
    .await;
    reporter.finish();

    let mut document: BTreeMap<&str, ForgeDiscovery> = BTreeMap::new();
    for entry in &entries {
        let name = entry.identity.name.as_str();
        let repos = discovered
            .get(name)
            .map(|set| set.iter().map(|r| r.path()).collect())
            .unwrap_or_default();
        document.insert(
            name,
            ForgeDiscovery {
                usernames: entry.usernames.clone(),
                repos,
            },
        );
    }

    let rendered = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&document)?,
        OutputFormat::Json => {
            let mut pretty = serde_json::to_string_pretty(&document)?;
            pretty.push('\n');
            pretty
        }
    };
    print!("{rendered}");

    // Failures go to stderr so stdout stays machine-readable.
    for failure in &failures {
        eprintln!("warning: {failure}");
    }

    Ok(())
}
