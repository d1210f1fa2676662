//! Converter (C3): drives an external transcoder binary as a subprocess,
//! parses its streamed progress, supports cancellation, and extracts
//! metadata via a sibling tool.

use crate::error::ConverterError;
use crate::model::{BookMetadata, ConversionProgress};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use uuid::Uuid;

const SUPPORTED_INPUT: &[&str] = &[
    "epub", "mobi", "azw3", "azw", "pdf", "cbz", "cbr", "fb2", "txt", "rtf", "html", "htmlz",
    "docx", "lit", "pdb",
];
const SUPPORTED_OUTPUT: &[&str] = &["epub", "mobi", "azw3", "pdf"];

/// Default ordered probe list for the converter binary (Calibre's `ebook-convert`).
const CONVERTER_PROBE_PATHS: &[&str] = &[
    "/Applications/calibre.app/Contents/MacOS/ebook-convert",
    "/usr/bin/ebook-convert",
    "/usr/local/bin/ebook-convert",
    "/opt/homebrew/bin/ebook-convert",
];
const CONVERTER_PROBE_NAME: &str = "ebook-convert";
const METADATA_TOOL_NAME: &str = "ebook-meta";

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{1,3})%\s*(.*)$").unwrap())
}

/// Options accepted by [`Converter::convert`].
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Device-profile string passed as `--output-profile`.
    pub profile: Option<String>,
    /// Whether to pass `--read-metadata-from-opf`.
    pub preserve_embedded_metadata: bool,
    /// JPEG quality in `[0,100]`; clamped.
    pub quality: Option<i32>,
    /// Explicit output directory; defaults to the source's directory.
    pub output_dir: Option<PathBuf>,
    /// Additional raw arguments appended last.
    pub extra_args: Vec<String>,
}

/// Clamp a raw quality input into `[0,100]` (§8 boundary behavior).
pub fn clamp_quality(raw: i32) -> i32 {
    raw.clamp(0, 100)
}

struct ActiveJob {
    cancel_tx: tokio::sync::oneshot::Sender<()>,
}

/// Drives the external converter binary.
pub struct Converter {
    resolved_path: Mutex<Option<PathBuf>>,
    metadata_tool_path: Mutex<Option<PathBuf>>,
    active_jobs: Mutex<HashMap<String, ActiveJob>>,
    progress_tx: broadcast::Sender<ConversionProgress>,
    explicit_path: Option<PathBuf>,
}

impl Converter {
    /// Construct a converter, probing for the binary immediately.
    pub fn new(explicit_path: Option<PathBuf>) -> Self {
        let (progress_tx, _rx) = broadcast::channel(256);
        let converter = Self {
            resolved_path: Mutex::new(None),
            metadata_tool_path: Mutex::new(None),
            active_jobs: Mutex::new(HashMap::new()),
            progress_tx,
            explicit_path,
        };
        converter.refresh();
        converter
    }

    /// Subscribe to progress ticks across all jobs (lossy broadcast).
    pub fn subscribe(&self) -> broadcast::Receiver<ConversionProgress> {
        self.progress_tx.subscribe()
    }

    /// Whether a converter binary was located.
    pub fn is_available(&self) -> bool {
        self.resolved_path.lock().is_some()
    }

    /// Re-probe the ordered path list (the user may have installed it mid-session).
    pub fn refresh(&self) {
        *self.resolved_path.lock() = probe(self.explicit_path.as_deref(), CONVERTER_PROBE_NAME);
        *self.metadata_tool_path.lock() = probe(None, METADATA_TOOL_NAME);
    }

    /// Number of conversions currently in flight.
    pub fn active_job_count(&self) -> usize {
        self.active_jobs.lock().len()
    }

    /// Cancel a running job. Idempotent: cancelling an unknown or already-
    /// finished job id is not an error.
    pub fn cancel(&self, job_id: &str) {
        if let Some(job) = self.active_jobs.lock().remove(job_id) {
            let _ = job.cancel_tx.send(());
        }
    }

    /// Transcode `source` into `target`, returning the output path.
    pub async fn convert(
        &self,
        source: &Path,
        target: &str,
        options: ConvertOptions,
    ) -> Result<PathBuf, ConverterError> {
        let binary = self
            .resolved_path
            .lock()
            .clone()
            .ok_or(ConverterError::ConverterMissing)?;

        if !source.exists() {
            return Err(ConverterError::SourceMissing(source.to_path_buf()));
        }
        let input_ext = source
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_INPUT.contains(&input_ext.as_str()) {
            return Err(ConverterError::UnsupportedInput(input_ext));
        }
        let target = target.to_ascii_lowercase();
        if !SUPPORTED_OUTPUT.contains(&target.as_str()) {
            return Err(ConverterError::UnsupportedOutput(target));
        }

        let output_dir = options
            .output_dir
            .clone()
            .or_else(|| source.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let base_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let output_path = output_dir.join(format!("{base_name}.{target}"));

        let mut args: Vec<String> = vec![
            source.to_string_lossy().into_owned(),
            output_path.to_string_lossy().into_owned(),
        ];
        if let Some(profile) = &options.profile {
            args.push("--output-profile".to_string());
            args.push(profile.clone());
        }
        if matches!(target.as_str(), "pdf" | "mobi" | "azw3") {
            let quality = clamp_quality(options.quality.unwrap_or(75));
            args.push("--jpeg-quality".to_string());
            args.push(quality.to_string());
        }
        if options.preserve_embedded_metadata {
            args.push("--read-metadata-from-opf".to_string());
        }
        args.extend(options.extra_args.iter().cloned());

        let job_id = Uuid::new_v4().to_string();
        let started_at = Instant::now();

        let mut child = Command::new(&binary)
            .args(&args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel();
        self.active_jobs
            .lock()
            .insert(job_id.clone(), ActiveJob { cancel_tx });

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let progress_tx = self.progress_tx.clone();
        let progress_job_id = job_id.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(caps) = progress_regex().captures(&line) {
                    let percent: u8 = caps
                        .get(1)
                        .and_then(|m| m.as_str().parse::<i32>().ok())
                        .map(|p| p.clamp(0, 100) as u8)
                        .unwrap_or(0);
                    let operation = caps
                        .get(2)
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(|| "Converting...".to_string());
                    let _ = progress_tx.send(ConversionProgress {
                        job_id: progress_job_id.clone(),
                        percent,
                        operation,
                        elapsed_ms: started_at.elapsed().as_millis() as u64,
                    });
                }
            }
        });

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let stderr_tail_writer = stderr_tail.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = stderr_tail_writer.lock();
                tail.push_str(&line);
                tail.push('\n');
                const MAX_TAIL: usize = 4096;
                if tail.len() > MAX_TAIL {
                    let start = tail.len() - MAX_TAIL;
                    *tail = tail[start..].to_string();
                }
            }
        });

        let wait_result = tokio::select! {
            status = child.wait() => Ok(status),
            _ = &mut cancel_rx => Err(()),
        };
        self.active_jobs.lock().remove(&job_id);

        let status = match wait_result {
            Ok(status) => status?,
            Err(()) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                let _ = tokio::fs::remove_file(&output_path).await;
                return Err(ConverterError::Cancelled);
            }
        };
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        let tail = stderr_tail.lock().clone();

        if !status.success() {
            return Err(ConverterError::ProcessFailed {
                exit_code: status.code(),
                stderr_tail: tail,
            });
        }
        if !output_path.exists() {
            return Err(ConverterError::ProcessFailed {
                exit_code: status.code(),
                stderr_tail: if tail.is_empty() {
                    "converter exited 0 but produced no output file".to_string()
                } else {
                    tail
                },
            });
        }

        Ok(output_path)
    }

    /// Extract metadata by running the sibling metadata tool and parsing its
    /// `key: value` dump (§4.1).
    pub async fn get_metadata(&self, path: &Path) -> Result<BookMetadata, ConverterError> {
        let tool = self
            .metadata_tool_path
            .lock()
            .clone()
            .ok_or(ConverterError::ConverterMissing)?;
        if !path.exists() {
            return Err(ConverterError::SourceMissing(path.to_path_buf()));
        }

        let output = Command::new(&tool).arg(path).output().await?;
        if !output.status.success() {
            return Err(ConverterError::ProcessFailed {
                exit_code: output.status.code(),
                stderr_tail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let dump = String::from_utf8_lossy(&output.stdout);
        Ok(parse_metadata_dump(&dump))
    }
}

fn probe(explicit: Option<&Path>, name: &str) -> Option<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() {
            return Some(p.to_path_buf());
        }
    }
    for candidate in CONVERTER_PROBE_PATHS {
        let candidate = Path::new(candidate);
        if candidate.file_name().and_then(|n| n.to_str()) == Some(name) && candidate.exists() {
            return Some(candidate.to_path_buf());
        }
    }
    which(name)
}

fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        candidate.is_file().then_some(candidate)
    })
}

fn parse_metadata_dump(dump: &str) -> BookMetadata {
    let mut meta = BookMetadata {
        confidence: 0.8,
        source: "converter".to_string(),
        ..Default::default()
    };

    for line in dump.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.as_str() {
            "title" => meta.title = Some(value.to_string()),
            "author(s)" | "authors" | "author" => {
                meta.authors = value
                    .split('&')
                    .flat_map(|part| part.split(','))
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect();
            }
            "publisher" => meta.publisher = Some(value.to_string()),
            "published" | "publication date" | "pubdate" => {
                meta.published_date = Some(value.to_string());
            }
            "language" | "languages" => meta.language = Some(value.to_string()),
            "tags" | "subjects" | "subject" => {
                meta.tags = value.split(',').map(|t| t.trim().to_string()).collect();
            }
            "series" => {
                if let Some((name, rest)) = value.split_once('[') {
                    meta.series = Some(name.trim().to_string());
                    meta.series_index = rest.trim_end_matches(']').trim().parse().ok();
                } else {
                    meta.series = Some(value.to_string());
                }
            }
            "series index" | "series_index" => {
                meta.series_index = value.parse().ok();
            }
            "isbn" => {
                let stripped: String = value.chars().filter(|c| *c != '-').collect();
                match stripped.len() {
                    10 => meta.isbn10 = Some(stripped),
                    13 => meta.isbn13 = Some(stripped),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_quality_matches_boundary_table() {
        assert_eq!(clamp_quality(-1), 0);
        assert_eq!(clamp_quality(0), 0);
        assert_eq!(clamp_quality(100), 100);
        assert_eq!(clamp_quality(101), 100);
    }

    #[test]
    fn progress_regex_parses_percent_and_trims_operation() {
        let caps = progress_regex().captures("42% Converting chapter 3").unwrap();
        assert_eq!(&caps[1], "42");
        assert_eq!(caps[2].trim(), "Converting chapter 3");
    }

    #[test]
    fn progress_percent_clamps_out_of_range_values() {
        for (raw, expected) in [("0%", 0u8), ("100%", 100u8), ("150%", 100u8)] {
            let caps = progress_regex().captures(raw).unwrap();
            let percent: u8 = caps[1].parse::<i32>().unwrap().clamp(0, 100) as u8;
            assert_eq!(percent, expected);
        }
    }

    #[test]
    fn metadata_dump_parses_authors_split_on_ampersand_then_comma() {
        let dump = "Title               : Good Omens\nAuthor(s)           : Terry Pratchett & Neil Gaiman\nISBN                : 9780060853983\n";
        let meta = parse_metadata_dump(dump);
        assert_eq!(meta.title.as_deref(), Some("Good Omens"));
        assert_eq!(meta.authors, vec!["Terry Pratchett", "Neil Gaiman"]);
        assert_eq!(meta.isbn13.as_deref(), Some("9780060853983"));
        assert_eq!(meta.confidence, 0.8);
        assert_eq!(meta.source, "converter");
    }

    #[test]
    fn metadata_dump_parses_series_with_index() {
        let dump = "Series              : Discworld [5]\n";
        let meta = parse_metadata_dump(dump);
        assert_eq!(meta.series.as_deref(), Some("Discworld"));
        assert_eq!(meta.series_index, Some(5.0));
    }

    #[test]
    fn isbn_length_other_than_10_or_13_is_discarded() {
        let dump = "ISBN                : 12345\n";
        let meta = parse_metadata_dump(dump);
        assert!(meta.isbn10.is_none());
        assert!(meta.isbn13.is_none());
    }
}
