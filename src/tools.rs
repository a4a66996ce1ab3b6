//! Built-in capabilities shipped with the `client` subcommand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::registry::{parse_arguments, Capability, CapabilityError, CapabilityRegistry};

/// Returns its arguments unchanged.
#[derive(Debug, Default)]
pub struct Echo;

#[async_trait]
impl Capability for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "returns its arguments unchanged"
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        Ok(arguments)
    }
}

#[derive(Debug, Deserialize)]
struct WriteDateTimeArgs {
    filename: String,
}

/// Writes the current local date and time into a text file under a fixed
/// directory and returns the written text.
#[derive(Debug)]
pub struct WriteDateTime {
    output_dir: PathBuf,
}

impl WriteDateTime {
    pub const NAME: &'static str = "write_datetime";

    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// Desktop, then home, then the current directory.
pub fn default_output_dir() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Accept a bare file name only and give it a `.txt` extension if missing.
fn normalize_filename(filename: &str) -> Result<String, CapabilityError> {
    let trimmed = filename.trim();
    let is_plain = !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && !trimmed.contains(&['/', '\\'][..])
        && Path::new(trimmed).file_name().is_some();
    if !is_plain {
        return Err(CapabilityError::InvalidArguments(format!(
            "filename must be a plain file name, got '{}'",
            filename
        )));
    }
    if trimmed.to_ascii_lowercase().ends_with(".txt") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{}.txt", trimmed))
    }
}

#[async_trait]
impl Capability for WriteDateTime {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "creates a file with the current date and time and returns the written text"
    }

    async fn execute(&self, arguments: Value) -> Result<Value, CapabilityError> {
        let args: WriteDateTimeArgs = parse_arguments(arguments)?;
        let filename = normalize_filename(&args.filename)?;
        let path = self.output_dir.join(filename);
        let content = format!(
            "Current Date and Time: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        tokio::fs::write(&path, &content).await?;
        tracing::info!(path = %path.display(), "wrote datetime file");
        Ok(Value::String(content))
    }
}

/// Registry with every built-in capability.
pub fn builtin_registry(output_dir: impl Into<PathBuf>) -> CapabilityRegistry {
    CapabilityRegistry::builder()
        .register(Arc::new(Echo))
        .register(Arc::new(WriteDateTime::new(output_dir)))
        .build()
}
