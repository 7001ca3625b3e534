//! Query types and routing for the indexing pipeline's search surface
//! (spec §4.9 "Query semantics", "Metadata search").

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use super::index_store::{DocumentIndex, StoredDocument};

/// Filters applied after term/path matching, before pagination (spec §4.9
/// "Metadata search"): name-pattern, path-pattern, size-range, time-range,
/// mime-types, file-types, directory, recursive, min-size, max-size.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilters {
    /// Directory scope. Paired with `recursive`: a recursive scope matches
    /// `directory` and every subdirectory beneath it (prefix match); a
    /// non-recursive scope matches only documents directly inside it.
    pub directory: Option<String>,
    pub recursive: bool,
    pub is_directory: Option<bool>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub time_range: Option<TimeRange>,
    pub metadata_equals: HashMap<String, String>,
    /// File extensions (without the dot) a document's filename must end
    /// with one of (spec §8 scenario 2 "file-type metadata filter").
    pub file_types: Option<Vec<String>>,
    /// MIME types a document's `mime_type` must match one of, compared
    /// case-insensitively.
    pub mime_types: Option<Vec<String>>,
    /// A `*`-wildcard glob matched against the filename (spec §8 scenario
    /// 6 "wildcard path matching").
    pub name_pattern: Option<String>,
    /// A `*`-wildcard glob matched against the full path.
    pub path_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub after: Option<SystemTime>,
    pub before: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SizeRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl MetadataFilters {
    fn matches(&self, doc: &StoredDocument) -> bool {
        if let Some(dir) = &self.directory {
            let in_scope = if self.recursive {
                doc.directory == *dir || doc.directory.starts_with(&format!("{dir}/"))
            } else {
                doc.directory == *dir
            };
            if !in_scope {
                return false;
            }
        }
        if let Some(is_dir) = self.is_directory {
            if doc.is_directory != is_dir {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if doc.size < min {
                return false;
            }
        }
        if let Some(max) = self.max_size {
            if doc.size > max {
                return false;
            }
        }
        if let Some(range) = &self.time_range {
            match doc.modified {
                Some(modified) => {
                    if range.after.map(|after| modified < after).unwrap_or(false) {
                        return false;
                    }
                    if range.before.map(|before| modified > before).unwrap_or(false) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for (k, v) in &self.metadata_equals {
            if doc.metadata.get(k) != Some(v) {
                return false;
            }
        }
        if let Some(types) = &self.file_types {
            let matches_type = doc
                .filename
                .rsplit_once('.')
                .map(|(_, ext)| types.iter().any(|t| t.eq_ignore_ascii_case(ext)))
                .unwrap_or(false);
            if !matches_type {
                return false;
            }
        }
        if let Some(mime_types) = &self.mime_types {
            let matches_mime = doc
                .mime_type
                .as_deref()
                .map(|mime| mime_types.iter().any(|m| m.eq_ignore_ascii_case(mime)))
                .unwrap_or(false);
            if !matches_mime {
                return false;
            }
        }
        if let Some(pattern) = &self.name_pattern {
            if !glob_match(pattern, &doc.filename) {
                return false;
            }
        }
        if let Some(pattern) = &self.path_pattern {
            if !glob_match(pattern, &doc.path) {
                return false;
            }
        }
        true
    }
}

/// Minimal single-`*` glob matcher: `prefix*suffix`. No wildcard matches
/// any string, matching the whole value.
fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => value.starts_with(prefix) && value.ends_with(suffix) && value.len() >= prefix.len() + suffix.len(),
        None => pattern == value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Relevance,
    Path,
    Size,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub max_results: usize,
    pub offset: usize,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub highlight: bool,
    pub filters: MetadataFilters,
    pub time_range: Option<TimeRange>,
    pub size_range: Option<SizeRange>,
    pub file_types: Option<Vec<String>>,
    pub directory: Option<String>,
    pub recursive: bool,
    pub facets: Vec<String>,
    pub min_score: Option<f64>,
    /// Advisory budget for the caller; [`search`]/[`search_metadata`] run
    /// synchronously over an in-memory index and do not enforce it.
    pub timeout: Option<Duration>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            offset: 0,
            sort_by: SortField::Relevance,
            sort_order: SortOrder::Descending,
            highlight: false,
            filters: MetadataFilters::default(),
            time_range: None,
            size_range: None,
            file_types: None,
            directory: None,
            recursive: false,
            facets: Vec::new(),
            min_score: None,
            timeout: None,
        }
    }
}

impl SearchOptions {
    /// Folds the top-level `time_range`/`size_range`/`file_types`/
    /// `directory`/`recursive` convenience fields into a single effective
    /// [`MetadataFilters`], so matching only has one filter code path. A
    /// field set both at the top level and inside `filters` prefers the
    /// top-level value.
    fn effective_filters(&self) -> MetadataFilters {
        let mut filters = self.filters.clone();
        if let Some(range) = self.time_range {
            filters.time_range = Some(range);
        }
        if let Some(range) = self.size_range {
            filters.min_size = range.min.or(filters.min_size);
            filters.max_size = range.max.or(filters.max_size);
        }
        if self.file_types.is_some() {
            filters.file_types = self.file_types.clone();
        }
        if self.directory.is_some() {
            filters.directory = self.directory.clone();
            filters.recursive = self.recursive;
        }
        filters
    }

    /// Canonical form used for result-cache key derivation: sorted,
    /// delimiter-joined fields so semantically identical options always
    /// normalize to the same string (spec §4.9 "result cache").
    pub fn normalized(&self) -> String {
        let filters = self.effective_filters();
        let mut meta: Vec<_> = filters.metadata_equals.iter().collect();
        meta.sort();
        let meta_str = meta.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",");

        let epoch_millis = |t: SystemTime| t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0);
        let (after, before) = filters
            .time_range
            .map(|r| (r.after.map(epoch_millis), r.before.map(epoch_millis)))
            .unwrap_or((None, None));

        format!(
            "max_results={}&offset={}&sort={:?}/{:?}&highlight={}&dir={}&recursive={}&is_dir={}&min={}&max={}&after={}&before={}&types={}&mime={}&name={}&path={}&meta={}&min_score={}",
            self.max_results,
            self.offset,
            self.sort_by,
            self.sort_order,
            self.highlight,
            filters.directory.as_deref().unwrap_or(""),
            filters.recursive,
            filters.is_directory.map(|b| b.to_string()).unwrap_or_default(),
            filters.min_size.map(|v| v.to_string()).unwrap_or_default(),
            filters.max_size.map(|v| v.to_string()).unwrap_or_default(),
            after.map(|v| v.to_string()).unwrap_or_default(),
            before.map(|v| v.to_string()).unwrap_or_default(),
            filters.file_types.as_ref().map(|t| t.join(",")).unwrap_or_default(),
            filters.mime_types.as_ref().map(|t| t.join(",")).unwrap_or_default(),
            filters.name_pattern.as_deref().unwrap_or(""),
            filters.path_pattern.as_deref().unwrap_or(""),
            meta_str,
            self.min_score.map(|v| v.to_string()).unwrap_or_default(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub filename: String,
    pub score: f64,
    pub preview: String,
    pub highlights: Vec<String>,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub mime_type: Option<String>,
    pub file_type: Option<String>,
    pub directory: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    pub total_matched: usize,
    pub max_score: f64,
    pub elapsed_time: Duration,
    pub facets: HashMap<String, HashMap<String, usize>>,
    pub has_more: bool,
}

/// Routes `query` to exact/wildcard/path-prefix matching depending on its
/// shape, applies filters, then paginates (spec §4.9 "Query semantics":
/// an empty query means match-all; a bare `*` or any `*`-containing term
/// goes to wildcard matching; a query that looks like a path with no `*`
/// goes to prefix matching; everything else is a plain term match).
pub fn search(index: &DocumentIndex, query: &str, options: &SearchOptions) -> SearchResults {
    let raw_matches = if query.is_empty() {
        index.all_paths().into_iter().map(|path| (path, 1.0)).collect()
    } else if query.contains('*') {
        index.search_wildcard(query)
    } else if looks_like_path(query) {
        index.search_path_prefix(query)
    } else {
        index.search_match(query)
    };

    run(index, raw_matches, &options.effective_filters(), options)
}

/// Structured metadata-only search: no free-text query, every document is
/// a candidate before `filters` narrows the result set (spec §4.9
/// "Metadata search").
pub fn search_metadata(index: &DocumentIndex, filters: &MetadataFilters, options: &SearchOptions) -> SearchResults {
    let raw_matches = index.all_paths().into_iter().map(|path| (path, 1.0)).collect();
    let mut effective = options.effective_filters();
    if filters.directory.is_some() {
        effective.directory = filters.directory.clone();
        effective.recursive = filters.recursive;
    }
    if filters.is_directory.is_some() {
        effective.is_directory = filters.is_directory;
    }
    if filters.min_size.is_some() {
        effective.min_size = filters.min_size;
    }
    if filters.max_size.is_some() {
        effective.max_size = filters.max_size;
    }
    if filters.time_range.is_some() {
        effective.time_range = filters.time_range;
    }
    if filters.file_types.is_some() {
        effective.file_types = filters.file_types.clone();
    }
    if filters.mime_types.is_some() {
        effective.mime_types = filters.mime_types.clone();
    }
    if filters.name_pattern.is_some() {
        effective.name_pattern = filters.name_pattern.clone();
    }
    if filters.path_pattern.is_some() {
        effective.path_pattern = filters.path_pattern.clone();
    }
    for (k, v) in &filters.metadata_equals {
        effective.metadata_equals.insert(k.clone(), v.clone());
    }

    run(index, raw_matches, &effective, options)
}

fn run(index: &DocumentIndex, raw_matches: Vec<(String, f64)>, filters: &MetadataFilters, options: &SearchOptions) -> SearchResults {
    let started = std::time::Instant::now();

    let mut matched: Vec<(StoredDocument, f64)> = raw_matches
        .into_iter()
        .filter_map(|(path, score)| index.get(&path).filter(|doc| filters.matches(doc)).map(|doc| (doc, score)))
        .collect();

    if let Some(min_score) = options.min_score {
        matched.retain(|(_, score)| *score >= min_score);
    }

    match options.sort_by {
        SortField::Relevance => matched.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.path.cmp(&b.0.path))),
        SortField::Path => matched.sort_by(|a, b| a.0.path.cmp(&b.0.path)),
        SortField::Size => matched.sort_by(|a, b| a.0.size.cmp(&b.0.size).then_with(|| a.0.path.cmp(&b.0.path))),
        SortField::Modified => matched.sort_by(|a, b| a.0.modified.cmp(&b.0.modified).then_with(|| a.0.path.cmp(&b.0.path))),
    }
    if options.sort_order == SortOrder::Descending {
        matched.reverse();
    }

    let total_matched = matched.len();
    let max_score = matched.iter().map(|(_, score)| *score).fold(0.0_f64, f64::max);
    let facets = compute_facets(&matched, &options.facets);

    let page: Vec<(StoredDocument, f64)> = matched.into_iter().skip(options.offset).take(options.max_results).collect();
    let has_more = options.offset + page.len() < total_matched;

    let hits = page
        .into_iter()
        .map(|(doc, score)| {
            let highlights = if options.highlight { highlight_snippets(&doc) } else { Vec::new() };
            SearchHit {
                path: doc.path,
                filename: doc.filename,
                score,
                preview: doc.preview,
                highlights,
                size: doc.size,
                modified: doc.modified,
                mime_type: doc.mime_type,
                file_type: doc.file_type,
                directory: doc.directory,
                is_directory: doc.is_directory,
            }
        })
        .collect();

    SearchResults {
        hits,
        total_matched,
        max_score,
        elapsed_time: started.elapsed(),
        facets,
        has_more,
    }
}

/// Best-effort highlight: the document's own preview, standing in for a
/// query-term-centered excerpt since the index does not retain term
/// positions needed for real snippet extraction.
fn highlight_snippets(doc: &StoredDocument) -> Vec<String> {
    if doc.preview.is_empty() {
        Vec::new()
    } else {
        vec![doc.preview.clone()]
    }
}

fn compute_facets(matched: &[(StoredDocument, f64)], requested: &[String]) -> HashMap<String, HashMap<String, usize>> {
    let mut facets = HashMap::new();
    for field in requested {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for (doc, _) in matched {
            let value = match field.as_str() {
                "file_type" => doc.file_type.clone(),
                "mime_type" => doc.mime_type.clone(),
                "directory" => Some(doc.directory.clone()),
                _ => None,
            };
            if let Some(value) = value {
                *counts.entry(value).or_insert(0) += 1;
            }
        }
        facets.insert(field.clone(), counts);
    }
    facets
}

fn looks_like_path(query: &str) -> bool {
    query.contains('/') && !query.contains(' ')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::document::IndexDocument;
    use std::collections::HashMap as Map;

    fn doc(path: &str, content: &str, size: u64) -> IndexDocument {
        IndexDocument {
            path: path.to_string(),
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            directory: path.rsplit_once('/').map(|(d, _)| d.to_string()).unwrap_or_default(),
            is_directory: false,
            size,
            modified: None,
            descriptor_cid: None,
            children_count: None,
            metadata: Map::new(),
            mime_type: None,
            file_type: None,
            tags: Vec::new(),
            full_text: Some(content.to_string()),
            preview: content.to_string(),
        }
    }

    #[test]
    fn plain_query_routes_to_term_match() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/a.txt", "storage engine internals", 10));
        let results = search(&index, "storage", &SearchOptions::default());
        assert_eq!(results.hits.len(), 1);
    }

    #[test]
    fn wildcard_query_routes_to_wildcard_match() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/a.txt", "storage engine", 10));
        let results = search(&index, "stor*", &SearchOptions::default());
        assert_eq!(results.hits.len(), 1);
    }

    #[test]
    fn path_like_query_routes_to_prefix_match() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/readme.txt", "hello", 10));
        index.upsert(&doc("other/file.txt", "hello", 10));
        let results = search(&index, "docs/", &SearchOptions::default());
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].path, "docs/readme.txt");
    }

    #[test]
    fn empty_query_matches_every_document() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/a.txt", "alpha", 10));
        index.upsert(&doc("docs/b.txt", "beta", 10));
        let results = search(&index, "", &SearchOptions::default());
        assert_eq!(results.total_matched, 2);
    }

    #[test]
    fn size_filter_excludes_out_of_range_documents() {
        let index = DocumentIndex::new();
        index.upsert(&doc("a.txt", "storage", 5));
        index.upsert(&doc("b.txt", "storage", 500));
        let options = SearchOptions { filters: MetadataFilters { min_size: Some(100), ..Default::default() }, ..Default::default() };
        let results = search(&index, "storage", &options);
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].path, "b.txt");
    }

    #[test]
    fn pagination_respects_max_results_and_offset() {
        let index = DocumentIndex::new();
        for i in 0..5 {
            index.upsert(&doc(&format!("f{}.txt", i), "storage term", 1));
        }
        let options = SearchOptions { max_results: 2, offset: 2, ..Default::default() };
        let results = search(&index, "storage", &options);
        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.total_matched, 5);
        assert!(results.has_more);
    }

    #[test]
    fn search_metadata_matches_by_file_type_with_no_query_text() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/a.txt", "alpha", 10));
        index.upsert(&doc("docs/b.md", "beta", 10));
        index.upsert(&doc("images/c.jpg", "gamma", 10));

        let filters = MetadataFilters { file_types: Some(vec!["txt".to_string(), "md".to_string()]), ..Default::default() };
        let results = search_metadata(&index, &filters, &SearchOptions::default());
        assert_eq!(results.total_matched, 2);
    }

    #[test]
    fn search_metadata_wildcard_name_pattern() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/guide.md", "guide", 10));
        index.upsert(&doc("docs/readme.txt", "readme", 10));

        let filters = MetadataFilters { name_pattern: Some("*.md".to_string()), ..Default::default() };
        let results = search_metadata(&index, &filters, &SearchOptions::default());
        assert_eq!(results.hits.len(), 1);
        assert_eq!(results.hits[0].path, "docs/guide.md");
    }

    #[test]
    fn non_recursive_directory_excludes_nested_subdirectories() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/a.txt", "alpha", 10));
        index.upsert(&doc("docs/nested/b.txt", "beta", 10));

        let filters = MetadataFilters { directory: Some("docs".to_string()), recursive: false, ..Default::default() };
        let results = search_metadata(&index, &filters, &SearchOptions::default());
        assert_eq!(results.total_matched, 1);
        assert_eq!(results.hits[0].path, "docs/a.txt");
    }

    #[test]
    fn recursive_directory_includes_nested_subdirectories() {
        let index = DocumentIndex::new();
        index.upsert(&doc("docs/a.txt", "alpha", 10));
        index.upsert(&doc("docs/nested/b.txt", "beta", 10));

        let filters = MetadataFilters { directory: Some("docs".to_string()), recursive: true, ..Default::default() };
        let results = search_metadata(&index, &filters, &SearchOptions::default());
        assert_eq!(results.total_matched, 2);
    }

    #[test]
    fn sort_by_size_ascending_orders_smallest_first() {
        let index = DocumentIndex::new();
        index.upsert(&doc("a.txt", "storage", 500));
        index.upsert(&doc("b.txt", "storage", 5));
        let options = SearchOptions { sort_by: SortField::Size, sort_order: SortOrder::Ascending, ..Default::default() };
        let results = search(&index, "storage", &options);
        assert_eq!(results.hits[0].path, "b.txt");
        assert_eq!(results.hits[1].path, "a.txt");
    }
}
