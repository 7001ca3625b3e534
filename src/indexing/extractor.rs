//! Content Extractor (spec §4.9 "Content extraction"): decides whether a
//! file is extractable by suffix, fetches its descriptor and child blocks
//! through the storage manager, and produces cleaned preview/body text.

use crate::block::BlockAddress;
use crate::error::{ErrorKind, Result, StorageError};
use crate::manager::StorageManager;
use std::sync::Arc;
use tokio::runtime::Handle;

use super::document::ContentProvider;

/// The decoded shape of a descriptor block: child CIDs plus the file's
/// total size. The binary descriptor format itself is out of scope for
/// this crate (spec §1 Non-goals); callers provide a [`DescriptorCodec`].
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub children: Vec<String>,
    pub size: u64,
}

/// External collaborator that turns a fetched descriptor block's bytes
/// into a [`Descriptor`].
pub trait DescriptorCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Descriptor>;
}

const DEFAULT_MAX_PREVIEW: usize = 512;

/// Extracts text content for indexing from descriptor/child blocks (spec
/// §4.9). `extract` is called synchronously from [`build_document`] but the
/// storage manager's own API is async; this type bridges the two via
/// [`Handle::block_on`] the same way the worker pool's dispatch loop does,
/// since the Content Extractor sits squarely inside that loop's call stack.
pub struct ContentExtractor {
    manager: Arc<StorageManager>,
    codec: Arc<dyn DescriptorCodec>,
    supported_types: Vec<String>,
    max_file_size: u64,
    max_preview_size: usize,
}

impl ContentExtractor {
    pub fn new(manager: Arc<StorageManager>, codec: Arc<dyn DescriptorCodec>, supported_types: Vec<String>, max_file_size: u64) -> Self {
        Self {
            manager,
            codec,
            supported_types,
            max_file_size,
            max_preview_size: DEFAULT_MAX_PREVIEW,
        }
    }

    pub fn with_max_preview_size(mut self, size: usize) -> Self {
        self.max_preview_size = size;
        self
    }

    /// True when `path`'s suffix is in the configured supported-types list
    /// (spec §4.9 "extractability by suffix").
    pub fn extractable(&self, path: &str) -> bool {
        match path.rsplit_once('.') {
            Some((_, ext)) => self.supported_types.iter().any(|t| t.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    async fn fetch_descriptor(&self, ctx: &crate::backend::OpContext, descriptor_cid: &str) -> Result<Descriptor> {
        let address = BlockAddress::from_legacy_cid(descriptor_cid.to_string(), String::new());
        let block = self.manager.get(ctx, &address).await?;
        self.codec.decode(block.data())
    }

    async fn fetch_body(&self, ctx: &crate::backend::OpContext, descriptor: &Descriptor, truncate_to_first_child: bool) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        let children = if truncate_to_first_child {
            &descriptor.children[..descriptor.children.len().min(1)]
        } else {
            &descriptor.children[..]
        };

        for cid in children {
            let address = BlockAddress::from_legacy_cid(cid.clone(), String::new());
            let block = self.manager.get(ctx, &address).await?;
            body.extend_from_slice(block.data());
        }
        Ok(body)
    }

    /// Fetches and cleans the content for `descriptor_cid`, producing the
    /// full text plus a truncated preview (spec §4.9). When `size` exceeds
    /// `max_file_size`, only the first child block is read.
    pub async fn extract_async(&self, descriptor_cid: &str, size: u64) -> Result<(String, String)> {
        let ctx = crate::backend::OpContext::new();
        let descriptor = self.fetch_descriptor(&ctx, descriptor_cid).await?;
        let truncate = size > self.max_file_size;
        let raw = self.fetch_body(&ctx, &descriptor, truncate).await?;

        let text = clean_text(&String::from_utf8_lossy(&raw));
        let preview = make_preview(&text, self.max_preview_size);
        Ok((text, preview))
    }
}

impl ContentProvider for ContentExtractor {
    fn extract(&self, descriptor_cid: &str, size: u64) -> Result<(String, String)> {
        let handle = Handle::try_current()
            .map_err(|_| StorageError::operation(ErrorKind::Unknown, "extract", "no tokio runtime available"))?;
        tokio::task::block_in_place(|| handle.block_on(self.extract_async(descriptor_cid, size)))
    }

    fn extractable(&self, path: &str) -> bool {
        ContentExtractor::extractable(self, path)
    }
}

/// Collapses whitespace, converts tabs, and strips non-printable bytes
/// other than newlines (spec §4.9 "text-cleaning rules").
fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = false;

    for ch in raw.chars() {
        let normalized = match ch {
            '\t' => ' ',
            '\n' | '\r' => ch,
            c if c.is_control() => continue,
            c => c,
        };

        if normalized == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = normalized.is_whitespace() && normalized != '\n' && normalized != '\r';
        }
        out.push(normalized);
    }

    out.trim().to_string()
}

/// Truncates to `max_len` and backs off to the nearest sentence or line
/// boundary past the 75% mark so previews don't end mid-word (spec §4.9).
fn make_preview(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }

    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let candidate = &text[..cut];

    let threshold = (max_len as f64 * 0.75) as usize;
    let boundary = candidate
        .rfind(". ")
        .filter(|&idx| idx >= threshold)
        .or_else(|| candidate.rfind('\n').filter(|&idx| idx >= threshold));

    match boundary {
        Some(idx) => format!("{}...", &candidate[..=idx].trim_end()),
        None => format!("{}...", candidate.trim_end()),
    }
}
