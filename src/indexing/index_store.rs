//! Persistent document index: term -> path inverted index plus a
//! per-path document store, scored by simple TF-style relevance (spec
//! §4.9 "Document/search index store").

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::document::IndexDocument;

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub path: String,
    pub filename: String,
    pub directory: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<std::time::SystemTime>,
    pub descriptor_cid: Option<String>,
    pub metadata: HashMap<String, String>,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
    pub tags: Vec<String>,
    pub preview: String,
    term_freqs: HashMap<String, usize>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<String, usize> {
    let mut freqs = HashMap::new();
    for t in tokens {
        *freqs.entry(t.clone()).or_insert(0) += 1;
    }
    freqs
}

struct Inner {
    documents: HashMap<String, StoredDocument>,
    inverted: HashMap<String, HashSet<String>>,
}

/// In-memory inverted index over indexed documents, guarded by a single
/// `RwLock` (coarse lock, short critical sections — see
/// [`crate::cache::LruTtlCache`] for the same pattern).
pub struct DocumentIndex {
    inner: RwLock<Inner>,
}

impl DocumentIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                documents: HashMap::new(),
                inverted: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().documents.len()
    }

    /// Upserts `doc`, tokenizing filename + content + metadata values into
    /// the searchable term set (spec §4.9 step 4).
    pub fn upsert(&self, doc: &IndexDocument) {
        let mut text = String::new();
        text.push_str(&doc.filename);
        text.push(' ');
        if let Some(full_text) = &doc.full_text {
            text.push_str(full_text);
        }
        for v in doc.metadata.values() {
            text.push(' ');
            text.push_str(v);
        }
        for tag in &doc.tags {
            text.push(' ');
            text.push_str(tag);
        }

        let tokens = tokenize(&text);
        let term_freqs = term_frequencies(&tokens);

        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner.documents.remove(&doc.path) {
            for term in existing.term_freqs.keys() {
                if let Some(paths) = inner.inverted.get_mut(term) {
                    paths.remove(&doc.path);
                    if paths.is_empty() {
                        inner.inverted.remove(term);
                    }
                }
            }
        }

        for term in term_freqs.keys() {
            inner.inverted.entry(term.clone()).or_default().insert(doc.path.clone());
        }

        inner.documents.insert(
            doc.path.clone(),
            StoredDocument {
                path: doc.path.clone(),
                filename: doc.filename.clone(),
                directory: doc.directory.clone(),
                is_directory: doc.is_directory,
                size: doc.size,
                modified: doc.modified,
                descriptor_cid: doc.descriptor_cid.clone(),
                metadata: doc.metadata.clone(),
                mime_type: doc.mime_type.clone(),
                file_type: doc.file_type.clone(),
                tags: doc.tags.clone(),
                preview: doc.preview.clone(),
                term_freqs,
            },
        );
    }

    /// Removes `path` from both the document store and the inverted index
    /// (spec §4.9 "delete").
    pub fn remove(&self, path: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        match inner.documents.remove(path) {
            Some(doc) => {
                for term in doc.term_freqs.keys() {
                    if let Some(paths) = inner.inverted.get_mut(term) {
                        paths.remove(path);
                        if paths.is_empty() {
                            inner.inverted.remove(term);
                        }
                    }
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, path: &str) -> Option<StoredDocument> {
        self.inner.read().unwrap().documents.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.read().unwrap().documents.contains_key(path)
    }

    pub fn all_paths(&self) -> Vec<String> {
        self.inner.read().unwrap().documents.keys().cloned().collect()
    }

    /// Plain term match: union of postings across all query tokens, scored
    /// by summed term frequency (a simplified TF scoring, grounded on the
    /// original's relevance-scoring shape but without IDF since this index
    /// has no fixed corpus size to normalize against).
    pub fn search_match(&self, query: &str) -> Vec<(String, f64)> {
        let inner = self.inner.read().unwrap();
        let tokens = tokenize(query);
        let mut scores: HashMap<String, f64> = HashMap::new();

        for token in &tokens {
            if let Some(paths) = inner.inverted.get(token) {
                for path in paths {
                    if let Some(doc) = inner.documents.get(path) {
                        let tf = *doc.term_freqs.get(token).unwrap_or(&0) as f64;
                        *scores.entry(path.clone()).or_insert(0.0) += tf;
                    }
                }
            }
        }

        let mut results: Vec<_> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        results
    }

    /// Matches a `*`-suffixed or `*`-prefixed term pattern against the
    /// inverted index's term set (spec §4.9 wildcard query routing).
    pub fn search_wildcard(&self, pattern: &str) -> Vec<(String, f64)> {
        let inner = self.inner.read().unwrap();
        let (prefix, suffix) = match pattern.split_once('*') {
            Some(parts) => parts,
            None => return self.search_match(pattern),
        };

        let mut scores: HashMap<String, f64> = HashMap::new();
        for (term, paths) in &inner.inverted {
            if term.starts_with(prefix) && term.ends_with(suffix) {
                for path in paths {
                    if let Some(doc) = inner.documents.get(path) {
                        let tf = *doc.term_freqs.get(term).unwrap_or(&0) as f64;
                        *scores.entry(path.clone()).or_insert(0.0) += tf;
                    }
                }
            }
        }

        let mut results: Vec<_> = scores.into_iter().collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
        results
    }

    /// Path-prefix routing for queries that look like directory paths
    /// rather than search terms (spec §4.9 "path-pattern-without-wildcard").
    pub fn search_path_prefix(&self, prefix: &str) -> Vec<(String, f64)> {
        let inner = self.inner.read().unwrap();
        let mut results: Vec<_> = inner
            .documents
            .keys()
            .filter(|p| p.starts_with(prefix))
            .map(|p| (p.clone(), 1.0))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

impl Default for DocumentIndex {
    fn default() -> Self {
        Self::new()
    }
}
