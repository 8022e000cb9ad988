use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::sync::Fingerprint;

const DOCUMENT_EXTENSION: &str = "md";

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus directory {0} does not exist")]
    MissingDir(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    NotUtf8(PathBuf),
}

/// One generated document, keyed by its file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDocument {
    pub name: String,
    pub content: String,
    pub fingerprint: Fingerprint,
}

impl LocalDocument {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let fingerprint = Fingerprint::of(&content);
        Self {
            name: name.into(),
            content,
            fingerprint,
        }
    }
}

/// Loads `*.md` documents from `dir`, sorted by name. With `changed`, only
/// the listed file names are loaded; entries that are not markdown or that
/// no longer exist are skipped.
pub async fn load_corpus(
    dir: &Path,
    changed: Option<&[String]>,
) -> Result<Vec<LocalDocument>, CorpusError> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return Err(CorpusError::MissingDir(dir.to_path_buf()));
    }

    let paths = match changed {
        Some(list) => changed_paths(dir, list).await,
        None => scan_dir(dir).await?,
    };

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let bytes = tokio::fs::read(&path).await.map_err(|source| CorpusError::Io {
            path: path.clone(),
            source,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| CorpusError::NotUtf8(path.clone()))?;
        docs.push(LocalDocument::new(name, content));
    }
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(dir = %dir.display(), count = docs.len(), "corpus loaded");
    Ok(docs)
}

/// Reads a changed-files list: one file name per line, blank lines and
/// `#` comments ignored.
pub async fn read_changed_list(path: &Path) -> Result<Vec<String>, CorpusError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn scan_dir(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let io_err = |source| CorpusError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        if is_document(&path) && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            paths.push(path);
        }
    }
    Ok(paths)
}

async fn changed_paths(dir: &Path, list: &[String]) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut paths = Vec::new();
    for entry in list {
        // Lists are produced relative to various roots; only the file name counts.
        let Some(file_name) = Path::new(entry).file_name() else {
            continue;
        };
        let path = dir.join(file_name);
        if !is_document(&path) || !seen.insert(path.clone()) {
            continue;
        }
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            paths.push(path);
        } else {
            warn!(file = %entry, "changed file not found in corpus, skipping");
        }
    }
    paths
}

fn is_document(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(DOCUMENT_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn loads_markdown_files_by_stem() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("B.md"), "bee").unwrap();
        std::fs::write(dir.path().join("A.md"), "ay").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();
        std::fs::create_dir(dir.path().join("sub.md")).unwrap();

        let docs = load_corpus(dir.path(), None).await.unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(docs[0].fingerprint, Fingerprint::of("ay"));
    }

    #[tokio::test]
    async fn changed_list_filters_and_dedupes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("A.md"), "a").unwrap();
        std::fs::write(dir.path().join("B.md"), "b").unwrap();

        let changed = vec![
            "quarters/B.md".to_string(),
            "B.md".to_string(),
            "gone.md".to_string(),
            "data.json".to_string(),
        ];
        let docs = load_corpus(dir.path(), Some(&changed)).await.unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["B"]);
    }

    #[tokio::test]
    async fn missing_dir_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_corpus(&dir.path().join("nope"), None).await.unwrap_err();
        assert!(matches!(err, CorpusError::MissingDir(_)));
    }

    #[tokio::test]
    async fn changed_list_skips_comments_and_blanks() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("changed.txt");
        std::fs::write(&list, "# generated\nA.md\n\n  B.md  \n").unwrap();

        let entries = read_changed_list(&list).await.unwrap();
        assert_eq!(entries, vec!["A.md", "B.md"]);
    }
}
