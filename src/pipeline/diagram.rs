//! Vector-diagram rasterisation through external converter processes.
//!
//! BPMN, draw.io and SVG files are turned into raster images by tools that
//! only work on files: the payload is written to a temporary input file, the
//! converter writes a temporary output file, and the output is read back and
//! base64-encoded.
//!
//! Both temporary files are [`NamedTempFile`]s owned by the single
//! [`convert_diagram`] call, so they are unlinked on every exit path,
//! including a converter that fails to spawn and a request future dropped
//! mid-conversion. Unique names keep concurrent requests apart.
//!
//! The process invocation itself sits behind [`DiagramConverter`] so tests
//! can substitute a fake and deployments can swap binaries.

use crate::config::ConverterCommands;
use crate::error::ExplainError;
use crate::format::DiagramKind;
use crate::pipeline::encode;
use crate::pipeline::message::ImagePart;
use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

/// Scale factor passed to `bpmn-to-image`.
const BPMN_SCALE: &str = "0.7";

/// Stderr bytes kept in a conversion failure message.
const STDERR_TAIL: usize = 512;

/// Runs one external conversion from `input` to `output`.
///
/// Implementations must leave a readable raster at `output` on success.
/// The error string becomes the cause of [`ExplainError::ConversionFailed`].
#[async_trait]
pub trait DiagramConverter: Send + Sync {
    async fn run(&self, kind: DiagramKind, input: &Path, output: &Path) -> Result<(), String>;
}

/// The production converter: spawns `bpmn-to-image`, `drawio` or `inkscape`.
#[derive(Debug, Clone, Default)]
pub struct CommandConverter {
    commands: ConverterCommands,
}

impl CommandConverter {
    pub fn new(commands: ConverterCommands) -> Self {
        Self { commands }
    }

    /// Program and arguments for one conversion.
    pub fn command_line(&self, kind: DiagramKind, input: &Path, output: &Path) -> (String, Vec<String>) {
        let input = input.display().to_string();
        let output = output.display().to_string();
        let args = match kind {
            DiagramKind::Bpmn => vec![
                format!("{input}:{output}"),
                "--scale".to_string(),
                BPMN_SCALE.to_string(),
            ],
            DiagramKind::Drawio => vec![
                "-x".to_string(),
                "-f".to_string(),
                kind.output_extension().to_string(),
                "-o".to_string(),
                output,
                input,
            ],
            DiagramKind::Svg => vec![
                input,
                "--export-type=png".to_string(),
                format!("--export-filename={output}"),
            ],
        };
        (self.commands.program(kind).to_string(), args)
    }
}

#[async_trait]
impl DiagramConverter for CommandConverter {
    async fn run(&self, kind: DiagramKind, input: &Path, output: &Path) -> Result<(), String> {
        let (program, args) = self.command_line(kind, input, output);
        debug!("Running converter: {} {}", program, args.join(" "));

        let result = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to spawn '{program}': {e}"))?;

        if result.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr);
        let stderr = stderr.trim();
        let tail = match stderr.char_indices().rev().nth(STDERR_TAIL) {
            Some((idx, _)) => &stderr[idx..],
            None => stderr,
        };
        if tail.is_empty() {
            Err(format!("'{program}' exited with {}", result.status))
        } else {
            Err(format!("'{program}' exited with {}: {tail}", result.status))
        }
    }
}

/// Rasterise a vector diagram and return it as an image part.
pub async fn convert_diagram(
    converter: &dyn DiagramConverter,
    kind: DiagramKind,
    payload: &str,
) -> Result<ImagePart, ExplainError> {
    let start = Instant::now();
    let format = kind.tag();
    let failed = |cause: String| ExplainError::ConversionFailed { format, cause };

    let bytes = encode::decode_payload(payload)?;

    let mut input = tempfile::Builder::new()
        .prefix("input-")
        .suffix(&format!(".{format}"))
        .tempfile()
        .map_err(|e| failed(format!("failed to create temp input file: {e}")))?;
    input
        .write_all(&bytes)
        .and_then(|()| input.flush())
        .map_err(|e| failed(format!("failed to write temp input file: {e}")))?;

    let output: NamedTempFile = tempfile::Builder::new()
        .prefix("output-")
        .suffix(&format!(".{}", kind.output_extension()))
        .tempfile()
        .map_err(|e| failed(format!("failed to create temp output file: {e}")))?;

    if let Err(cause) = converter.run(kind, input.path(), output.path()).await {
        warn!("{} conversion failed: {}", format, cause);
        return Err(failed(cause));
    }

    let raster = tokio::fs::read(output.path())
        .await
        .map_err(|e| failed(format!("failed to read output file: {e}")))?;
    if raster.is_empty() {
        return Err(failed("converter produced an empty output file".to_string()));
    }

    debug!(
        "Converted {} ({} bytes) → {} bytes {} in {:?}",
        format,
        bytes.len(),
        raster.len(),
        kind.output_extension(),
        start.elapsed()
    );

    Ok(encode::encode_bytes(kind.output_mime(), &raster))
}
