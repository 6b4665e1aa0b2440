//! Deterministic pagination of oversized observations.
//!
//! An observation longer than the slice budget is replaced by a page-table
//! summary.  The token is the first 16 hex chars of
//! `SHA-256(source ∥ "\n" ∥ content)`, so the same oversized observation
//! always yields the same token and the same pages.
//!
//! The table holds at most `capacity` sources.  Registering one more evicts
//! the least recently paginated or focused source; its token then resolves
//! like any unknown token.

use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};

use crate::error::ManifoldError;

pub const TOKEN_LEN: usize = 16;

pub const DEFAULT_PAGE_TABLE_CAPACITY: usize = 64;

/// Compute the pagination token for `content` observed at `source`.
pub fn page_token(source: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..TOKEN_LEN].to_string()
}

#[derive(Debug, Clone)]
struct PagedSource {
    source: String,
    /// Content split on char boundaries.
    pages: Vec<String>,
    total_chars: usize,
    page_size: usize,
}

/// In-memory registry of paginated observations, keyed by token.
#[derive(Debug)]
pub struct PageTable {
    entries: HashMap<String, PagedSource>,
    /// Least recently used first.
    recency: VecDeque<String>,
    capacity: usize,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PAGE_TABLE_CAPACITY)
    }
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn touch(&mut self, token: &str) {
        if let Some(pos) = self.recency.iter().position(|t| t == token) {
            self.recency.remove(pos);
        }
        self.recency.push_back(token.to_string());
    }

    fn evict_to_fit(&mut self) {
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register `content` and return its `[PAGE_TABLE_SUMMARY]` block.
    pub fn paginate(&mut self, source: &str, content: &str, page_size: usize) -> String {
        let page_size = page_size.max(1);
        let token = page_token(source, content);
        if !self.entries.contains_key(&token) {
            self.evict_to_fit();
        }
        self.touch(&token);
        let entry = self.entries.entry(token.clone()).or_insert_with(|| {
            let chars: Vec<char> = content.chars().collect();
            PagedSource {
                source: source.to_string(),
                pages: chars
                    .chunks(page_size)
                    .map(|chunk| chunk.iter().collect())
                    .collect(),
                total_chars: chars.len(),
                page_size,
            }
        });
        format!(
            "[PAGE_TABLE_SUMMARY]\nToken={token}\nSource={}\nTotalChars={}\nPageSize={}\nTotalPages={}\nNext=sys://page/{token}?p=1",
            entry.source,
            entry.total_chars,
            entry.page_size,
            entry.pages.len()
        )
    }

    /// Render page `page` (1-based) of `token`.
    pub fn focus(&mut self, token: &str, page: u32) -> Result<String, ManifoldError> {
        if !self.entries.contains_key(token) {
            return Err(ManifoldError::PageNotFound(token.to_string()));
        }
        self.touch(token);
        let entry = &self.entries[token];
        let total = entry.pages.len() as u32;
        if page == 0 || page > total {
            return Err(ManifoldError::PageOutOfRange {
                token: token.to_string(),
                page,
                total,
            });
        }
        let body = &entry.pages[(page - 1) as usize];
        let mut frame = format!(
            "[FOCUS_PAGE_CONTENT] Token={token} Source={} FocusPage={page} TotalPages={total}\n{body}",
            entry.source
        );
        if page < total {
            frame.push_str(&format!("\n[NEXT_PAGE] sys://page/{token}?p={}", page + 1));
        }
        Ok(frame)
    }
}
