//! The `examsession result` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use examsession_core::aggregate::aggregate;
use examsession_gateway::{create_gateway, load_config_from};

use crate::render::{render, OutputFormat};

pub async fn execute(
    attempt_id: String,
    format: String,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let format: OutputFormat = format.parse()?;
    let config = load_config_from(config_path.as_deref())?;
    let gateway = create_gateway(&config.gateway)?;

    let mut attempt = gateway
        .get_attempt(&attempt_id)
        .await
        .with_context(|| format!("failed to load attempt {attempt_id}"))?;
    attempt.normalize();
    if !attempt.is_finalized() {
        anyhow::bail!("attempt {attempt_id} is still in progress");
    }

    let raw = gateway
        .get_result(&attempt_id)
        .await
        .with_context(|| format!("failed to fetch result for attempt {attempt_id}"))?;
    let result = aggregate(&attempt, &raw);
    let rendered = render(&result, format)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Result written to: {}", path.display());
        }
        None => println!("{rendered}"),
    }

    Ok(())
}
