//! Document source and normalizer.
//!
//! Walks the vault, converts every matching file to plain UTF-8 text, and
//! writes it to a mirrored tree under the normalized directory with the
//! extension replaced by `.txt`:
//!
//! ```text
//! all/projects/rust.md      →  all-txt/projects/rust.txt
//! all/papers/attention.pdf  →  all-txt/papers/attention.txt
//! ```
//!
//! Markdown and text files pass through unchanged. PDFs go through
//! `pdf-extract`, which reads the embedded text layer. Outputs are
//! overwritten on every run, so normalizing an unchanged tree twice yields
//! byte-identical files.
//!
//! A file that cannot be read, decoded, extracted, or written is recorded
//! in [`NormalizeReport::failures`] and the run moves on.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notes_rag_core::models::NormalizedDocument;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::NormalizeConfig;

/// Always excluded, in addition to `normalize.exclude_globs`.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.obsidian/**", "**/.trash/**"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Markdown,
    Pdf,
    Text,
}

impl DocumentFormat {
    /// Pick the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

/// A file from the vault, before conversion.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_path: PathBuf,
    /// Path relative to the source root, `/`-separated.
    pub relative_path: String,
    pub format: DocumentFormat,
    pub raw_bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid UTF-8")]
    Utf8 { path: String },
    #[error("failed to extract text from {path}: {message}")]
    Pdf { path: String, message: String },
    #[error("unsupported file type: {path}")]
    Unsupported { path: String },
    #[error("{path} and {first} both map to {output}")]
    Collision {
        path: String,
        first: String,
        output: String,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl NormalizationError {
    /// Relative path of the source file that failed.
    pub fn path(&self) -> &str {
        match self {
            Self::Read { path, .. }
            | Self::Utf8 { path }
            | Self::Pdf { path, .. }
            | Self::Unsupported { path }
            | Self::Collision { path, .. }
            | Self::Write { path, .. } => path,
        }
    }
}

/// Outcome of one normalization run.
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// Files written, across all formats.
    pub files_converted: usize,
    pub markdown: usize,
    pub pdf: usize,
    pub text: usize,
    pub failures: Vec<NormalizationError>,
}

/// List vault files matching the include globs and none of the excludes,
/// as sorted `/`-separated relative paths.
pub fn scan_sources(source_dir: &Path, config: &NormalizeConfig) -> Result<Vec<String>> {
    if !source_dir.is_dir() {
        bail!("Source directory does not exist: {}", source_dir.display());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or(entry.path());
        let rel_str = to_slash(relative);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(rel_str);
    }

    paths.sort();
    Ok(paths)
}

/// Read one vault file.
pub fn read_raw(source_dir: &Path, relative_path: &str) -> Result<RawDocument, NormalizationError> {
    let source_path = source_dir.join(relative_path);
    let format =
        DocumentFormat::from_path(&source_path).ok_or_else(|| NormalizationError::Unsupported {
            path: relative_path.to_string(),
        })?;
    let raw_bytes = std::fs::read(&source_path).map_err(|source| NormalizationError::Read {
        path: relative_path.to_string(),
        source,
    })?;
    Ok(RawDocument {
        source_path,
        relative_path: relative_path.to_string(),
        format,
        raw_bytes,
    })
}

/// Convert a raw document to canonical plain text.
pub fn to_text(raw: &RawDocument) -> Result<String, NormalizationError> {
    match raw.format {
        DocumentFormat::Markdown | DocumentFormat::Text => String::from_utf8(raw.raw_bytes.clone())
            .map_err(|_| NormalizationError::Utf8 {
                path: raw.relative_path.clone(),
            }),
        DocumentFormat::Pdf => extract_pdf(&raw.raw_bytes).map_err(|message| {
            NormalizationError::Pdf {
                path: raw.relative_path.clone(),
                message,
            }
        }),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    // pdf-extract panics on some malformed inputs.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| "PDF parser panicked".to_string())?
        .map_err(|e| e.to_string())
}

/// `notes/a.md` → `notes/a.txt`.
pub fn output_relative_path(relative_path: &str) -> String {
    let path = Path::new(relative_path).with_extension("txt");
    to_slash(&path)
}

/// Convert every vault file under `source_dir` into `dest_dir`.
///
/// Fails only when the source tree cannot be scanned; per-file problems
/// are collected in the report.
pub fn normalize(
    source_dir: &Path,
    dest_dir: &Path,
    config: &NormalizeConfig,
) -> Result<NormalizeReport> {
    let mut sources = scan_sources(source_dir, config)?;

    // Never feed our own output back in when dest_dir sits inside source_dir.
    if let Ok(dest_rel) = dest_dir.strip_prefix(source_dir) {
        let prefix = format!("{}/", to_slash(dest_rel));
        if prefix != "/" {
            sources.retain(|p| !p.starts_with(&prefix));
        }
    }

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

    let mut report = NormalizeReport::default();
    let mut written: HashMap<String, String> = HashMap::new();

    for relative_path in &sources {
        match convert_one(source_dir, dest_dir, relative_path, &mut written) {
            Ok(format) => {
                report.files_converted += 1;
                match format {
                    DocumentFormat::Markdown => report.markdown += 1,
                    DocumentFormat::Pdf => report.pdf += 1,
                    DocumentFormat::Text => report.text += 1,
                }
            }
            Err(e) => {
                warn!(path = %relative_path, error = %e, "skipping file");
                report.failures.push(e);
            }
        }
    }

    info!(
        converted = report.files_converted,
        markdown = report.markdown,
        pdf = report.pdf,
        text = report.text,
        failed = report.failures.len(),
        "normalization complete"
    );
    Ok(report)
}

fn convert_one(
    source_dir: &Path,
    dest_dir: &Path,
    relative_path: &str,
    written: &mut HashMap<String, String>,
) -> Result<DocumentFormat, NormalizationError> {
    let output = output_relative_path(relative_path);
    if let Some(first) = written.get(&output) {
        return Err(NormalizationError::Collision {
            path: relative_path.to_string(),
            first: first.clone(),
            output,
        });
    }

    let raw = read_raw(source_dir, relative_path)?;
    let text = to_text(&raw)?;

    let output_path = dest_dir.join(&output);
    let write_err = |source| NormalizationError::Write {
        path: relative_path.to_string(),
        source,
    };
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(&output_path, text.as_bytes()).map_err(write_err)?;

    written.insert(output, relative_path.to_string());
    Ok(raw.format)
}

/// Load every `.txt` under `dir` as a [`NormalizedDocument`], sorted by path.
pub fn load_normalized(dir: &Path) -> Result<Vec<NormalizedDocument>> {
    if !dir.is_dir() {
        bail!(
            "Normalized directory does not exist: {} (run `rag normalize` first)",
            dir.display()
        );
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_txt = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);
        if !is_txt {
            continue;
        }
        let relative = to_slash(entry.path().strip_prefix(dir).unwrap_or(entry.path()));
        let text = std::fs::read_to_string(entry.path())
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        docs.push(NormalizedDocument::new(relative, text));
    }

    docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(docs)
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
