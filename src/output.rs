use crate::{
    codec::EncodedImage,
    report::OutputFile,
    util::{ensure_dir, sha256_hex},
};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const MANIFEST_SUFFIX: &str = "strips.json";

pub fn single_path(out_dir: &Path, stem: &str, extension: &str) -> PathBuf {
    out_dir.join(format!("{stem}.{extension}"))
}

pub fn strip_path(out_dir: &Path, stem: &str, index: usize, extension: &str) -> PathBuf {
    out_dir.join(format!("{stem}.s{index:04}.{extension}"))
}

pub fn manifest_path(out_dir: &Path, stem: &str) -> PathBuf {
    out_dir.join(format!("{stem}.{MANIFEST_SUFFIX}"))
}

/// First existing output for `stem` under any of `extensions`, if any.
pub fn existing_output(out_dir: &Path, stem: &str, extensions: &[&str]) -> Option<PathBuf> {
    extensions
        .iter()
        .map(|ext| single_path(out_dir, stem, ext))
        .chain(std::iter::once(manifest_path(out_dir, stem)))
        .find(|p| p.exists())
}

#[derive(Debug, Serialize)]
struct StripManifest<'a> {
    width: u32,
    height: u32,
    channel_count: u8,
    bytes_per_channel: u8,
    strategy: &'a str,
    strips: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    file: String,
    start_row: u32,
    rows: u32,
    bytes: u64,
    sha256: String,
}

#[derive(Debug, Clone)]
pub struct Persisted {
    /// The file metadata should be attached to: the image itself, or the
    /// manifest when the output is split into strips.
    pub primary: PathBuf,
    pub files: Vec<OutputFile>,
}

/// Writes every file to a temp file in `out_dir` first and only then
/// renames them into place. On error nothing is left behind.
pub fn persist(out_dir: &Path, stem: &str, image: &EncodedImage) -> Result<Persisted> {
    if image.strips.is_empty() {
        bail!("nothing to write for {stem}: no encoded strips");
    }
    ensure_dir(out_dir)?;

    let mut staged: Vec<(NamedTempFile, PathBuf, OutputFile)> = Vec::new();
    let primary = if image.strips.len() == 1 {
        let path = single_path(out_dir, stem, &image.extension);
        let bytes = &image.strips[0].bytes;
        staged.push((stage(out_dir, bytes)?, path.clone(), describe(&path, bytes)));
        path
    } else {
        let mut entries = Vec::with_capacity(image.strips.len());
        for (i, strip) in image.strips.iter().enumerate() {
            let path = strip_path(out_dir, stem, i, &image.extension);
            let file = describe(&path, &strip.bytes);
            entries.push(ManifestEntry {
                file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                start_row: strip.start_row,
                rows: strip.rows,
                bytes: file.bytes,
                sha256: file.sha256.clone(),
            });
            staged.push((stage(out_dir, &strip.bytes)?, path, file));
        }
        let manifest = StripManifest {
            width: image.geometry.width,
            height: image.geometry.height,
            channel_count: image.geometry.channel_count,
            bytes_per_channel: image.geometry.bytes_per_channel,
            strategy: image.strategy.label(),
            strips: entries,
        };
        let raw = serde_json::to_vec_pretty(&manifest)?;
        let path = manifest_path(out_dir, stem);
        staged.push((stage(out_dir, &raw)?, path.clone(), describe(&path, &raw)));
        path
    };

    let mut placed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    let mut files = Vec::with_capacity(staged.len());
    for (tmp, path, file) in staged {
        if let Err(err) = tmp.persist(&path) {
            for p in &placed {
                if let Err(e) = std::fs::remove_file(p) {
                    warn!(path = %p.display(), "cleanup after failed persist: {e}");
                }
            }
            return Err(err.error).with_context(|| format!("persist {}", path.display()));
        }
        debug!(path = %path.display(), bytes = file.bytes, "output written");
        placed.push(path);
        files.push(file);
    }

    Ok(Persisted { primary, files })
}

/// Removes every file `persist` placed. Missing files are ignored.
pub fn discard(persisted: &Persisted) {
    for file in &persisted.files {
        match std::fs::remove_file(&file.path) {
            Ok(()) => debug!(path = %file.path, "output discarded"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %file.path, "discard output: {err}"),
        }
    }
}

fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(bytes).with_context(|| "write temp file")?;
    tmp.flush()?;
    Ok(tmp)
}

fn describe(path: &Path, bytes: &[u8]) -> OutputFile {
    OutputFile {
        path: path.display().to_string(),
        bytes: bytes.len() as u64,
        sha256: sha256_hex(bytes),
    }
}
