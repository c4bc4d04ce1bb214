//! File Discovery (C7): walks a repository root honoring `.gitignore` and
//! a skip-dir set, filters out binary files, and diffs the result against
//! the last manifest to produce the set of files the Indexing Pipeline
//! actually needs to (re)chunk.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::chunk::hash_content;
use crate::manifest::FileManifest;

/// Default file-size ceiling when no project configuration overrides it —
/// matches [`crate::config::default_max_file_size`].
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Discovery configuration: the directories under `root` to scan (empty
/// means the whole root), directories to always skip, and an optional
/// extension allowlist.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub root: PathBuf,
    pub scan_dirs: Vec<String>,
    pub skip_dirs: Vec<String>,
    pub extensions: Vec<String>,
    /// Files larger than this are skipped outright, mirroring
    /// `ProjectConfig::max_file_size` from the configuration surface.
    pub max_file_size: u64,
}

impl ScanConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scan_dirs: Vec::new(),
            skip_dirs: default_skip_dirs(),
            extensions: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE_BYTES,
        }
    }
}

fn default_skip_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "__pycache__",
        "target",
        "dist",
        "build",
        ".next",
        "vendor",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// A file found during discovery, with enough metadata for the pipeline
/// to decide whether it needs (re)chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub size: u64,
    pub content_hash: String,
}

/// Returns `true` if the first 8KB of `path` contains a NUL byte, which
/// is a reliable enough binary signal without a full content-type sniff.
fn is_text_file(path: &Path) -> bool {
    use std::io::Read;
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 8192];
    let Ok(n) = file.read(&mut buf) else {
        return false;
    };
    !buf[..n].contains(&0)
}

/// Walks `config.root` in parallel via `ignore::WalkBuilder`, honoring
/// `.gitignore` and the skip-dir set, and returns every text file found
/// along with its content hash.
pub fn discover_files(config: &ScanConfig) -> Vec<DiscoveredFile> {
    let skip_dirs = config.skip_dirs.clone();
    let root = config.root.clone();
    let extensions = config.extensions.clone();
    let max_file_size = config.max_file_size;

    let paths: std::sync::Mutex<Vec<PathBuf>> = std::sync::Mutex::new(Vec::new());
    let walker = WalkBuilder::new(&root)
        .hidden(true)
        .git_ignore(true)
        .filter_entry(move |entry| {
            if let Some(name) = entry.file_name().to_str() {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                    && skip_dirs.iter().any(|d| d == name)
                {
                    return false;
                }
            }
            true
        })
        .build_parallel();

    walker.run(|| {
        let paths = &paths;
        Box::new(move |entry| {
            if let Ok(entry) = entry {
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    paths.lock().unwrap().push(entry.into_path());
                }
            }
            ignore::WalkState::Continue
        })
    });

    let paths = paths.into_inner().unwrap();
    paths
        .into_par_iter()
        .filter_map(|abs_path| {
            let meta = std::fs::metadata(&abs_path).ok()?;
            if meta.len() > max_file_size {
                return None;
            }
            if !extensions.is_empty() {
                let ext = abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
                if !extensions.iter().any(|e| e == ext) {
                    return None;
                }
            }
            if !is_text_file(&abs_path) {
                return None;
            }
            let content = std::fs::read_to_string(&abs_path).ok()?;
            let rel_path = abs_path
                .strip_prefix(&root)
                .unwrap_or(&abs_path)
                .to_string_lossy()
                .replace('\\', "/");
            Some(DiscoveredFile {
                rel_path,
                abs_path,
                size: meta.len(),
                content_hash: hash_content(&content),
            })
        })
        .collect()
}

/// Splits discovered files into (changed-or-new, unchanged) against a
/// manifest, so the pipeline only re-chunks what actually needs it.
pub fn diff_against_manifest(
    files: &[DiscoveredFile],
    manifest: &FileManifest,
) -> (Vec<DiscoveredFile>, Vec<DiscoveredFile>) {
    files
        .iter()
        .cloned()
        .partition(|f| manifest.is_stale(&f.rel_path, &f.content_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{EmbeddingState, FileEntry, FileManifest};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovers_text_files_and_skips_configured_dirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/ignored.rs"), "fn ignored() {}").unwrap();

        let config = ScanConfig::new(dir.path());
        let files = discover_files(&config);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].rel_path, "a.rs");
    }

    #[test]
    fn binary_files_are_excluded() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.bin"), [0u8, 1, 2, 0, 3]).unwrap();
        let config = ScanConfig::new(dir.path());
        let files = discover_files(&config);
        assert!(files.is_empty());
    }

    #[test]
    fn diff_against_manifest_separates_changed_from_unchanged() {
        let file_a = DiscoveredFile {
            rel_path: "a.rs".into(),
            abs_path: "a.rs".into(),
            size: 5,
            content_hash: "hash-a".into(),
        };
        let file_b = DiscoveredFile {
            rel_path: "b.rs".into(),
            abs_path: "b.rs".into(),
            size: 5,
            content_hash: "hash-b-new".into(),
        };
        let mut manifest = FileManifest::new();
        manifest.upsert(FileEntry {
            rel_path: "a.rs".into(),
            content_hash: "hash-a".into(),
            size: 5,
            chunk_count: 1,
            chunk_ids: Vec::new(),
            embedding_state: EmbeddingState::default(),
            indexed_at_unix: 0,
        });
        manifest.upsert(FileEntry {
            rel_path: "b.rs".into(),
            content_hash: "hash-b-old".into(),
            size: 5,
            chunk_count: 1,
            chunk_ids: Vec::new(),
            embedding_state: EmbeddingState::default(),
            indexed_at_unix: 0,
        });

        let (changed, unchanged) = diff_against_manifest(&[file_a, file_b], &manifest);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].rel_path, "b.rs");
        assert_eq!(unchanged.len(), 1);
        assert_eq!(unchanged[0].rel_path, "a.rs");
    }
}
