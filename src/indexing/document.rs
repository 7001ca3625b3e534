//! Document construction for `add`/`update` index requests (spec §4.9
//! "Document construction").

use crate::error::{ErrorKind, Result, StorageError};
use std::collections::HashMap;
use std::time::SystemTime;

/// External file-index collaborator the worker consults by path (spec §4.9
/// step 1). Concrete lookups (filesystem, manifest walk, ...) live outside
/// this crate; callers supply an implementation.
pub trait FileIndexLookup: Send + Sync {
    fn lookup(&self, path: &str) -> Option<FileMetadata>;
    fn is_directory(&self, path: &str) -> bool;
    fn directory_children_count(&self, path: &str) -> usize;
}

#[derive(Debug, Clone, Default)]
pub struct FileMetadata {
    pub size: u64,
    pub modified: SystemTime,
    pub descriptor_cid: String,
    pub extra: HashMap<String, String>,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
    pub tags: Vec<String>,
}

impl FileMetadata {
    pub fn new(size: u64, modified: SystemTime, descriptor_cid: impl Into<String>) -> Self {
        Self {
            size,
            modified,
            descriptor_cid: descriptor_cid.into(),
            extra: HashMap::new(),
            mime_type: None,
            file_type: None,
            tags: Vec::new(),
        }
    }
}

/// A document in the searchable index: either a real file or a synthetic
/// directory placeholder (spec §4.9 step 1). Field set mirrors spec §3's
/// `FileMetadata` data model: path, size, modified time, mime type, file
/// type, content identifier, directory, optional preview, optional full
/// text, tags, and free-form metadata.
#[derive(Debug, Clone)]
pub struct IndexDocument {
    pub path: String,
    pub filename: String,
    pub directory: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub descriptor_cid: Option<String>,
    pub children_count: Option<usize>,
    pub metadata: HashMap<String, String>,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
    pub tags: Vec<String>,
    pub full_text: Option<String>,
    pub preview: String,
}

fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

/// Builds the document for `add`/`update` (spec §4.9 steps 1-3; step 4 is the
/// caller's responsibility — upserting into the index).
pub fn build_document(
    path: &str,
    request_metadata: &HashMap<String, String>,
    file_index: &dyn FileIndexLookup,
    extractor: &dyn ContentProvider,
) -> Result<IndexDocument> {
    let metadata = match file_index.lookup(path) {
        Some(m) => m,
        None => {
            if file_index.is_directory(path) {
                return Ok(IndexDocument {
                    path: path.to_string(),
                    filename: basename(path),
                    directory: dirname(path),
                    is_directory: true,
                    size: 0,
                    modified: None,
                    descriptor_cid: None,
                    children_count: Some(file_index.directory_children_count(path)),
                    metadata: HashMap::new(),
                    mime_type: None,
                    file_type: None,
                    tags: Vec::new(),
                    full_text: None,
                    preview: String::new(),
                });
            }
            return Err(StorageError::operation(ErrorKind::NotFound, "build_document", format!("file-not-found: {}", path)));
        }
    };

    let filename = basename(path);
    let file_type = metadata.file_type.clone().or_else(|| filename.rsplit_once('.').map(|(_, ext)| ext.to_lowercase()));

    let mut doc = IndexDocument {
        path: path.to_string(),
        filename: filename.clone(),
        directory: dirname(path),
        is_directory: false,
        size: metadata.size,
        modified: Some(metadata.modified),
        descriptor_cid: Some(metadata.descriptor_cid.clone()),
        children_count: None,
        metadata: request_metadata.clone(),
        mime_type: metadata.mime_type.clone(),
        file_type,
        tags: metadata.tags.clone(),
        full_text: None,
        preview: String::new(),
    };
    for (k, v) in &metadata.extra {
        doc.metadata.entry(k.clone()).or_insert_with(|| v.clone());
    }

    if doc.full_text.is_none() && doc.preview.is_empty() && extractor.extractable(path) {
        match extractor.extract(&metadata.descriptor_cid, doc.size) {
            Ok((content, preview)) => {
                doc.full_text = Some(content);
                doc.preview = preview;
            }
            Err(_) => {
                // Best-effort: leave full_text/preview empty, indexing
                // proceeds on metadata alone (spec §4.9 step 3).
            }
        }
    }

    Ok(doc)
}

/// Narrow seam `build_document` needs from the Content Extractor, kept here
/// to avoid a circular module dependency between `document` and `extractor`.
pub trait ContentProvider: Send + Sync {
    fn extract(&self, descriptor_cid: &str, size: u64) -> Result<(String, String)>;

    /// Extractability by path suffix (spec §4.9 "Content Extractor...decides
    /// extractability from a configured list of file-type suffixes"). The
    /// default treats every path as extractable; [`crate::indexing::extractor::ContentExtractor`]
    /// overrides this with its configured suffix list.
    fn extractable(&self, _path: &str) -> bool {
        true
    }
}

/// External collaborator polled by the optional file watcher (spec §4.9
/// "File watcher"): returns every entry whose `modified` time is strictly
/// newer than `since`. Implementations outside this crate own the actual
/// directory walk; the watcher only needs the delta.
pub trait FileLister: Send + Sync {
    fn list_modified_since(&self, since: SystemTime) -> Vec<(String, SystemTime)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFileIndex {
        files: HashMap<String, FileMetadata>,
        dirs: Vec<String>,
    }

    impl FileIndexLookup for FakeFileIndex {
        fn lookup(&self, path: &str) -> Option<FileMetadata> {
            self.files.get(path).cloned()
        }
        fn is_directory(&self, path: &str) -> bool {
            self.dirs.iter().any(|d| d == path)
        }
        fn directory_children_count(&self, path: &str) -> usize {
            self.files.keys().filter(|p| p.starts_with(path)).count()
        }
    }

    struct NoopExtractor;
    impl ContentProvider for NoopExtractor {
        fn extract(&self, _descriptor_cid: &str, _size: u64) -> Result<(String, String)> {
            Ok(("body".to_string(), "prev".to_string()))
        }
    }

    #[test]
    fn builds_file_document_with_extracted_content() {
        let mut files = HashMap::new();
        files.insert(
            "documents/readme.txt".to_string(),
            FileMetadata::new(1024, SystemTime::now(), "QmTest1"),
        );
        let index = FakeFileIndex { files, dirs: vec![] };

        let doc = build_document("documents/readme.txt", &HashMap::new(), &index, &NoopExtractor).unwrap();
        assert_eq!(doc.filename, "readme.txt");
        assert_eq!(doc.directory, "documents");
        assert!(!doc.is_directory);
        assert_eq!(doc.full_text.as_deref(), Some("body"));
        assert_eq!(doc.file_type.as_deref(), Some("txt"));
    }

    #[test]
    fn synthesizes_directory_document() {
        let index = FakeFileIndex { files: HashMap::new(), dirs: vec!["images".to_string()] };
        let doc = build_document("images", &HashMap::new(), &index, &NoopExtractor).unwrap();
        assert!(doc.is_directory);
        assert_eq!(doc.children_count, Some(0));
    }

    #[test]
    fn missing_path_is_file_not_found() {
        let index = FakeFileIndex { files: HashMap::new(), dirs: vec![] };
        let err = build_document("ghost.txt", &HashMap::new(), &index, &NoopExtractor).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
