//! Record loader: reads every participant response file in a directory
//!
//! Files are enumerated in path order, filtered by the configured file globs
//! and ignore globs, and parsed as CSV. A file that cannot be read or decoded
//! is skipped and counted, never fatal to the run.

pub mod fields;

pub use fields::{FieldTable, LogicalField, ResolvedColumns};

use crate::config::{build_ignore_set, is_ignored, Config};
use crate::error::LoadError;
use anyhow::{Context, Result};
use globset::GlobSet;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DEFAULT_PARTICIPANT_PATTERN: &str = r"(?i)participant[_\- ]?([A-Za-z0-9]+)";

/// One data row as read from a participant file, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// File name relative to the data directory
    pub source_file: String,
    /// 1-indexed data row (header excluded)
    pub row: usize,
    /// From the participant column, or derived from the file name
    pub participant_id: String,
    /// Non-empty trimmed cell values keyed by logical field
    pub fields: BTreeMap<LogicalField, String>,
}

impl RawRecord {
    pub fn get(&self, field: LogicalField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// Provenance of one successfully loaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProvenance {
    pub file_name: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub file_name: String,
    pub reason: String,
}

/// Per-run file counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub skipped_files: Vec<SkippedFile>,
}

/// Everything the loader produced for one directory snapshot
#[derive(Debug, Clone, Default)]
pub struct LoadedRecords {
    pub records: Vec<RawRecord>,
    pub stats: LoadStats,
    pub files: Vec<FileProvenance>,
    /// Rows the CSV reader could not parse
    pub unparseable_rows: usize,
}

impl LoadedRecords {
    /// SHA-256 over the loaded file names and their content digests
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.file_name.as_bytes());
            hasher.update([0u8]);
            hasher.update(file.sha256.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

/// Result of parsing a single file
struct FileLoad {
    records: Vec<RawRecord>,
    rows: usize,
    unparseable_rows: usize,
    sha256: String,
}

/// Loader for participant response files
pub struct RecordLoader {
    fields: FieldTable,
    file_patterns: GlobSet,
    ignore_set: GlobSet,
    participant_pattern: Regex,
    /// Directories never scanned (the report output directory)
    excluded: Vec<PathBuf>,
}

impl RecordLoader {
    /// Build a loader from the effective configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let fields = FieldTable::with_overrides(&config.fields)?;
        let patterns: Vec<String> = config
            .file_patterns()
            .into_iter()
            .map(str::to_string)
            .collect();
        let file_patterns = build_ignore_set(&patterns).context("Invalid filePatterns")?;
        let ignore_set = build_ignore_set(&config.ignore_patterns()).context("Invalid ignore")?;
        let pattern = config
            .participant_id_pattern
            .as_deref()
            .unwrap_or(DEFAULT_PARTICIPANT_PATTERN);
        let participant_pattern = Regex::new(pattern)
            .with_context(|| format!("Invalid participantIdPattern: {}", pattern))?;

        Ok(Self {
            fields,
            file_patterns,
            ignore_set,
            participant_pattern,
            excluded: Vec::new(),
        })
    }

    /// Skip everything under `dir`, so published reports are never read back as responses
    pub fn excluding(mut self, dir: &Path) -> Self {
        self.excluded.push(dir.to_path_buf());
        self
    }

    /// Participant files under `dir`, sorted by path
    pub fn collect_files(&self, dir: &Path) -> Vec<PathBuf> {
        // the same directory may be spelled relative, absolute or through a symlink
        let excluded: Vec<PathBuf> = self.excluded.iter().map(|d| canonical(d)).collect();
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !excluded.is_empty() {
                let resolved = canonical(path);
                if excluded.iter().any(|d| resolved.starts_with(d)) {
                    continue;
                }
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            if !self.file_patterns.is_match(Path::new(name)) {
                continue;
            }
            let relative = path.strip_prefix(dir).unwrap_or(path);
            if is_ignored(relative, &self.ignore_set) {
                log::debug!("ignoring {}", relative.display());
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        files
    }

    /// Load every participant file in `dir`. An absent directory yields an empty result.
    pub fn load_dir(&self, dir: &Path) -> LoadedRecords {
        let mut loaded = LoadedRecords::default();
        if !dir.is_dir() {
            log::warn!("response directory {} does not exist", dir.display());
            return loaded;
        }

        for path in self.collect_files(dir) {
            let file_name = relative_name(dir, &path);
            loaded.stats.attempted += 1;

            match self.load_file(&path, &file_name) {
                Ok(file) => {
                    log::info!(
                        "loaded {}: {} rows, {} records",
                        file_name,
                        file.rows,
                        file.records.len()
                    );
                    loaded.stats.succeeded += 1;
                    loaded.unparseable_rows += file.unparseable_rows;
                    loaded.files.push(FileProvenance {
                        file_name,
                        rows: file.rows,
                        sha256: file.sha256,
                    });
                    loaded.records.extend(file.records);
                }
                Err(e) => {
                    log::warn!("skipping {}: {}", file_name, e);
                    loaded.stats.skipped += 1;
                    loaded.stats.skipped_files.push(SkippedFile {
                        file_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "files attempted: {}, loaded: {}, skipped: {}",
            loaded.stats.attempted,
            loaded.stats.succeeded,
            loaded.stats.skipped
        );
        loaded
    }

    fn load_file(&self, path: &Path, file_name: &str) -> Result<FileLoad, LoadError> {
        let bytes = fs::read(path)?;
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let text = std::str::from_utf8(&bytes).map_err(|e| LoadError::Encoding(e.valid_up_to()))?;
        let text = text.trim_start_matches('\u{feff}');

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| LoadError::Header(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let columns = self.fields.resolve(&headers);
        if !columns.is_usable() {
            return Err(LoadError::NoRecognizedColumns);
        }

        let fallback_participant = self.participant_from_filename(path);
        let mut records = Vec::new();
        let mut rows = 0;
        let mut unparseable_rows = 0;

        for (index, result) in reader.records().enumerate() {
            rows += 1;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("{} row {}: {}", file_name, index + 1, e);
                    unparseable_rows += 1;
                    continue;
                }
            };

            let mut values = BTreeMap::new();
            for field in columns.fields() {
                let Some(col) = columns.index(field) else {
                    continue;
                };
                if let Some(cell) = record.get(col) {
                    if !cell.is_empty() {
                        values.insert(field, cell.to_string());
                    }
                }
            }
            if values.is_empty() {
                rows -= 1;
                continue;
            }

            let participant_id = values
                .remove(&LogicalField::ParticipantId)
                .unwrap_or_else(|| fallback_participant.clone());

            records.push(RawRecord {
                source_file: file_name.to_string(),
                row: index + 1,
                participant_id,
                fields: values,
            });
        }

        Ok(FileLoad {
            records,
            rows,
            unparseable_rows,
            sha256,
        })
    }

    /// Participant id from the file stem: first capture of the pattern, else the whole stem
    pub fn participant_from_filename(&self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.participant_pattern
            .captures(&stem)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or(stem)
    }
}

/// Path relative to `dir`, always with forward slashes
/// Canonical form of `path`, or the path itself when it cannot be resolved
fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn relative_name(dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn loader() -> RecordLoader {
        RecordLoader::from_config(&Config::default()).unwrap()
    }

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_absent_directory_is_empty() {
        let loaded = loader().load_dir(Path::new("/definitely/not/here"));
        assert!(loaded.records.is_empty());
        assert_eq!(loaded.stats.attempted, 0);
    }

    #[test]
    fn test_loads_rows_with_column_synonyms() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "participant_01.csv",
            "Participant ID,Image,Face View,Trust Rating\nP01,img1,Full Face,5\nP01,img2,left,3\n",
        );
        write(
            dir.path(),
            "participant_02.csv",
            "ParticipantID,ImageID,FaceView,TrustRating\nP02,img1,right,4\n",
        );

        let loaded = loader().load_dir(dir.path());
        assert_eq!(loaded.stats.attempted, 2);
        assert_eq!(loaded.stats.succeeded, 2);
        assert_eq!(loaded.records.len(), 3);
        assert_eq!(loaded.records[0].participant_id, "P01");
        assert_eq!(loaded.records[0].get(LogicalField::FaceView), Some("Full Face"));
        assert_eq!(loaded.records[2].participant_id, "P02");
        assert_eq!(loaded.records[2].get(LogicalField::TrustRating), Some("4"));
    }

    #[test]
    fn test_participant_from_filename() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "Participant-07_session.csv",
            "Image,View,Trust\nimg1,full,6\n",
        );

        let loaded = loader().load_dir(dir.path());
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].participant_id, "07");
    }

    #[test]
    fn test_filename_without_pattern_uses_stem() {
        let l = loader();
        assert_eq!(l.participant_from_filename(Path::new("x/subjectA.csv")), "subjectA");
        assert_eq!(l.participant_from_filename(Path::new("participant_12.csv")), "12");
    }

    #[test]
    fn test_sample_and_demo_files_excluded() {
        let dir = TempDir::new().unwrap();
        let body = "Image,View,Trust\nimg1,full,6\n";
        write(dir.path(), "participant_01.csv", body);
        write(dir.path(), "sample_participant.csv", body);
        write(dir.path(), "demo_data.csv", body);
        write(dir.path(), "notes.txt", body);

        let files = loader().collect_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("participant_01.csv"));
    }

    #[test]
    fn test_output_directory_not_scanned() {
        let dir = TempDir::new().unwrap();
        let body = "Image,View,Trust\nimg1,full,6\n";
        write(dir.path(), "participant_01.csv", body);
        write(dir.path(), "report/icc_trust_rating_results.csv", "table,term,statistic,value\n");

        let files = loader().excluding(&dir.path().join("report")).collect_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("participant_01.csv"));
    }

    #[test]
    fn test_output_directory_excluded_under_another_spelling() {
        let dir = TempDir::new().unwrap();
        let body = "Image,View,Trust\nimg1,full,6\n";
        write(dir.path(), "data/participant_01.csv", body);
        write(dir.path(), "data/report/icc_trust_rating_results.csv", "table,term,statistic,value\n");

        // scanned through a detour, excluded by its canonical path
        let data = dir.path().join("data").join("report").join("..");
        let report = dir.path().join("data").canonicalize().unwrap().join("report");
        let loaded = loader().excluding(&report).load_dir(&data);

        assert_eq!(loaded.stats.attempted, 1);
        assert_eq!(loaded.stats.skipped, 0);
        assert_eq!(loaded.files.len(), 1);
    }

    #[test]
    fn test_invalid_utf8_file_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "participant_01.csv", "Image,View,Trust\nimg1,full,6\n");
        fs::write(
            dir.path().join("participant_02.csv"),
            [b'I', b'm', b'a', b'g', b'e', b'\n', 0xff, 0xfe, 0xfd],
        )
        .unwrap();

        let loaded = loader().load_dir(dir.path());
        assert_eq!(loaded.stats.attempted, 2);
        assert_eq!(loaded.stats.succeeded, 1);
        assert_eq!(loaded.stats.skipped, 1);
        assert_eq!(loaded.stats.skipped_files[0].file_name, "participant_02.csv");
        assert!(loaded.stats.skipped_files[0].reason.contains("UTF-8"));
        assert_eq!(loaded.records.len(), 1);
    }

    #[test]
    fn test_file_without_required_columns_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "participant_01.csv", "foo,bar\n1,2\n");

        let loaded = loader().load_dir(dir.path());
        assert_eq!(loaded.stats.skipped, 1);
        assert!(loaded.records.is_empty());
    }

    #[test]
    fn test_blank_rows_ignored() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "participant_01.csv",
            "Image,View,Trust\nimg1,full,6\n,,\nimg2,left,4\n",
        );

        let loaded = loader().load_dir(dir.path());
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.files[0].rows, 2);
    }

    #[test]
    fn test_fingerprint_stable_and_content_sensitive() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "participant_01.csv", "Image,View,Trust\nimg1,full,6\n");
        let first = loader().load_dir(dir.path()).fingerprint();
        let second = loader().load_dir(dir.path()).fingerprint();
        assert_eq!(first, second);

        write(dir.path(), "participant_01.csv", "Image,View,Trust\nimg1,full,5\n");
        let changed = loader().load_dir(dir.path()).fingerprint();
        assert_ne!(first, changed);
    }

    #[test]
    fn test_nested_files_use_relative_names() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "wave1/participant_01.csv", "Image,View,Trust\nimg1,full,6\n");

        let loaded = loader().load_dir(dir.path());
        assert_eq!(loaded.records[0].source_file, "wave1/participant_01.csv");
    }
}
