//! The `examsession init` command.

use anyhow::Result;

use examsession_gateway::config::CONFIG_FILE_NAME;

pub fn execute() -> Result<()> {
    if std::path::Path::new(CONFIG_FILE_NAME).exists() {
        println!("{CONFIG_FILE_NAME} already exists, skipping.");
    } else {
        std::fs::write(CONFIG_FILE_NAME, SAMPLE_CONFIG)?;
        println!("Created {CONFIG_FILE_NAME}");
    }

    println!("\nNext steps:");
    println!("  1. Try the offline demo: examsession take --attempt demo");
    println!("  2. Switch [gateway] to type = \"rest\" and set EXAMSESSION_TOKEN");
    println!("  3. Run: examsession status --attempt <id>");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# examsession configuration

# Offline demo gateway serving attempt "demo".
[gateway]
type = "mock"
duration_secs = 600

# Remote exam data gateway:
# [gateway]
# type = "rest"
# base_url = "https://exams.example.com/api/v1"
# token = "${EXAMSESSION_TOKEN}"
# timeout_secs = 30

[session]
tick_interval_ms = 1000
"#;
