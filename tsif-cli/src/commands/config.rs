use crate::commands::ConfigAction;
use crate::output::{OutputFormat, Reporter};
use std::path::PathBuf;
use tsif_core::{Config, Result};

pub async fn execute(
    action: ConfigAction,
    config: Config,
    config_path: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    let report = Reporter::new(format);
    match action {
        ConfigAction::Show => {
            if config_path.exists() {
                report.info(format!("Configuration from {}", config_path.display()));
            } else {
                report.info(format!("{} not found, showing defaults", config_path.display()));
            }
            println!("{}", format.document(&config)?);
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                report.warn(format!(
                    "{} already exists, use --force to overwrite",
                    config_path.display()
                ));
                return Ok(());
            }

            Config::default().save_to(&config_path)?;
            report.done(format!("Wrote default configuration to {}", config_path.display()));
        }
    }

    Ok(())
}
