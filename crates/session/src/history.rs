use std::sync::Mutex;

use agora_core::DebateSummary;

/// Shared cache backing the session-list (sidebar) view.
///
/// Updated only through `replace_all` (initial fetch) and `insert_new`
/// (save notification); the streaming fold logic never touches it.
pub struct HistoryCache {
    entries: Mutex<Vec<DebateSummary>>,
    limit: usize,
}

impl HistoryCache {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            limit,
        }
    }

    /// Replace the cache with a freshly fetched listing.
    pub fn replace_all(&self, mut entries: Vec<DebateSummary>) {
        entries.truncate(self.limit);
        *self.entries.lock().unwrap() = entries;
    }

    /// Prepend a newly saved session, dropping any stale entry with the same
    /// id and anything past the limit.
    pub fn insert_new(&self, summary: DebateSummary) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.id != summary.id);
        entries.insert(0, summary);
        entries.truncate(self.limit);
    }

    pub fn snapshot(&self) -> Vec<DebateSummary> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
