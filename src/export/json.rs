use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use super::SessionExport;

/// Largest export file accepted for import
pub const MAX_IMPORT_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Export a session as pretty-printed JSON
pub fn export_json<W: Write>(export: &SessionExport, mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, export)?;
    writeln!(writer)?;
    Ok(())
}

/// Parse a JSON export, refusing input over [`MAX_IMPORT_SIZE`]
pub fn import_json<R: Read>(reader: R) -> Result<SessionExport> {
    let mut limited = reader.take(MAX_IMPORT_SIZE + 1);
    let mut buf = Vec::new();
    limited.read_to_end(&mut buf)?;
    if buf.len() as u64 > MAX_IMPORT_SIZE {
        anyhow::bail!("Export too large (max 10MB)");
    }
    let export = serde_json::from_slice(&buf).context("Failed to parse session export")?;
    Ok(export)
}

/// Load a JSON export from disk
pub fn load_export(path: impl AsRef<Path>) -> Result<SessionExport> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open export file: {}", path.display()))?;

    // Check file size to prevent DoS via huge JSON
    let metadata = file
        .metadata()
        .with_context(|| format!("Failed to read export file metadata: {}", path.display()))?;
    if metadata.len() > MAX_IMPORT_SIZE {
        anyhow::bail!("Export file too large (max 10MB): {}", path.display());
    }

    import_json(BufReader::new(file)).with_context(|| format!("Failed to load {}", path.display()))
}
