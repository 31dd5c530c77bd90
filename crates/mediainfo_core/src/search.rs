use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::debug;

use crate::api::{MediaType, RepoReadApi, SearchHit};

pub const DEFAULT_SEARCH_LIMIT: usize = 40;

/// Where the next page of a media type's results starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case", tag = "state", content = "offset")]
pub enum Continuation {
    /// Nothing fetched yet for the current term.
    #[default]
    NotStarted,
    Offset(u64),
    Exhausted,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeResults {
    pub hits: Vec<SearchHit>,
    pub continuation: Continuation,
    pub pending: bool,
}

/// Search results for one term, kept per media type.
#[derive(Debug, Clone)]
pub struct SearchStore {
    term: String,
    limit: usize,
    results: BTreeMap<MediaType, TypeResults>,
}

impl Default for SearchStore {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_LIMIT)
    }
}

impl SearchStore {
    pub fn new(limit: usize) -> Self {
        let mut store = Self {
            term: String::new(),
            limit: limit.max(1),
            results: BTreeMap::new(),
        };
        store.reset("");
        store
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    /// Starts over with `term`, dropping the results of every type.
    pub fn reset(&mut self, term: &str) {
        self.term = term.trim().to_string();
        self.results = MediaType::ALL
            .into_iter()
            .map(|media_type| (media_type, TypeResults::default()))
            .collect();
    }

    pub fn results(&self, media_type: MediaType) -> &[SearchHit] {
        self.results
            .get(&media_type)
            .map(|entry| entry.hits.as_slice())
            .unwrap_or_default()
    }

    pub fn continuation(&self, media_type: MediaType) -> Continuation {
        self.results
            .get(&media_type)
            .map(|entry| entry.continuation)
            .unwrap_or_default()
    }

    pub fn is_pending(&self, media_type: MediaType) -> bool {
        self.results
            .get(&media_type)
            .is_some_and(|entry| entry.pending)
    }

    pub fn has_more(&self, media_type: MediaType) -> bool {
        self.continuation(media_type) != Continuation::Exhausted
    }

    /// Results ordered by their position in the search; the store keeps its own order.
    pub fn sorted_results(&self, media_type: MediaType) -> Vec<SearchHit> {
        let mut sorted = self.results(media_type).to_vec();
        sorted.sort_by_key(|hit| hit.index);
        sorted
    }

    pub fn no_results(&self, media_type: MediaType) -> bool {
        self.results(media_type).is_empty()
    }

    /// Fetches the next page for `media_type` and appends it. Returns the number
    /// of hits added; nothing is requested once the results are exhausted.
    pub fn search_more<A: RepoReadApi + ?Sized>(
        &mut self,
        api: &mut A,
        media_type: MediaType,
    ) -> Result<usize> {
        if self.term.is_empty() {
            bail!("search term is empty");
        }
        let offset = match self.continuation(media_type) {
            Continuation::Exhausted => return Ok(0),
            Continuation::NotStarted => None,
            Continuation::Offset(offset) => Some(offset),
        };

        let entry = self.results.entry(media_type).or_default();
        entry.pending = true;
        let page = api.search_media(&self.term, media_type, offset, self.limit);
        let entry = self.results.entry(media_type).or_default();
        entry.pending = false;
        let page = page?;

        let added = page.hits.len();
        entry.hits.extend(page.hits);
        entry.continuation = match page.continue_offset {
            Some(next) => Continuation::Offset(next),
            None => Continuation::Exhausted,
        };
        debug!(
            term = %self.term,
            media_type = media_type.as_str(),
            added,
            total = entry.hits.len(),
            "search page loaded"
        );
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRepo;

    fn repo() -> MockRepo {
        let mut repo = MockRepo::default();
        repo.search_titles.insert(
            MediaType::Bitmap,
            (1..=5).map(|n| format!("File:Cat {n}.jpg")).collect(),
        );
        repo.search_titles
            .insert(MediaType::Audio, vec!["File:Dog bark.ogg".to_string()]);
        repo
    }

    fn hit(title: &str, index: u64) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            page_id: index + 1,
            index,
            snippet: None,
        }
    }

    #[test]
    fn fresh_store_has_more_but_no_results() {
        let store = SearchStore::new(2);
        for media_type in MediaType::ALL {
            assert!(store.has_more(media_type));
            assert!(store.no_results(media_type));
            assert!(!store.is_pending(media_type));
        }
    }

    #[test]
    fn search_more_pages_until_exhausted() {
        let mut api = repo();
        let mut store = SearchStore::new(2);
        store.reset("cat");

        assert_eq!(store.search_more(&mut api, MediaType::Bitmap).expect("page"), 2);
        assert_eq!(store.continuation(MediaType::Bitmap), Continuation::Offset(2));
        assert_eq!(store.search_more(&mut api, MediaType::Bitmap).expect("page"), 2);
        assert_eq!(store.search_more(&mut api, MediaType::Bitmap).expect("page"), 1);
        assert!(!store.has_more(MediaType::Bitmap));
        assert_eq!(store.results(MediaType::Bitmap).len(), 5);

        let requests = api.request_count();
        assert_eq!(store.search_more(&mut api, MediaType::Bitmap).expect("noop"), 0);
        assert_eq!(api.request_count(), requests);

        assert_eq!(store.search_more(&mut api, MediaType::Audio).expect("page"), 0);
        assert!(store.no_results(MediaType::Audio));
        assert!(!store.has_more(MediaType::Audio));
    }

    #[test]
    fn sorted_results_leave_store_order_alone() {
        let mut store = SearchStore::new(10);
        store.reset("x");
        if let Some(entry) = store.results.get_mut(&MediaType::Video) {
            entry.hits = vec![hit("File:B.webm", 3), hit("File:A.webm", 1)];
        }
        let sorted: Vec<u64> = store
            .sorted_results(MediaType::Video)
            .iter()
            .map(|item| item.index)
            .collect();
        assert_eq!(sorted, vec![1, 3]);
        assert_eq!(store.results(MediaType::Video)[0].index, 3);
    }

    #[test]
    fn reset_clears_every_type() {
        let mut api = repo();
        let mut store = SearchStore::new(2);
        store.reset("cat");
        store.search_more(&mut api, MediaType::Bitmap).expect("page");
        store.reset("dog");
        assert_eq!(store.term(), "dog");
        assert!(store.no_results(MediaType::Bitmap));
        assert_eq!(store.continuation(MediaType::Bitmap), Continuation::NotStarted);
    }

    #[test]
    fn empty_term_is_rejected() {
        let mut api = repo();
        let mut store = SearchStore::default();
        assert!(store.search_more(&mut api, MediaType::Audio).is_err());
    }
}
