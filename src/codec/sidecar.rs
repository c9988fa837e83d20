use super::{MetadataMap, MetadataWriter};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes metadata next to the output as `<output file name>.meta.json`.
#[derive(Debug, Default, Clone)]
pub struct SidecarMetadataWriter;

impl SidecarMetadataWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn sidecar_path(output_path: &Path) -> PathBuf {
        let mut name = output_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".meta.json");
        output_path.with_file_name(name)
    }
}

impl MetadataWriter for SidecarMetadataWriter {
    fn name(&self) -> &str {
        "sidecar-json"
    }

    fn write(&self, output_path: &Path, metadata: &MetadataMap) -> Result<()> {
        let path = Self::sidecar_path(output_path);
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, metadata)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path)
            .with_context(|| format!("persist {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, output_path: &Path) -> Result<()> {
        let path = Self::sidecar_path(output_path);
        match std::fs::remove_file(&path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err).with_context(|| format!("remove {}", path.display()))
            }
            _ => Ok(()),
        }
    }
}

/// Stand-in when metadata output is switched off.
#[derive(Debug, Default, Clone)]
pub struct DisabledMetadataWriter;

impl MetadataWriter for DisabledMetadataWriter {
    fn name(&self) -> &str {
        "none"
    }

    fn available(&self) -> bool {
        false
    }

    fn write(&self, _output_path: &Path, _metadata: &MetadataMap) -> Result<()> {
        Ok(())
    }
}
