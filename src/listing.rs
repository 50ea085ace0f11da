//! Continuation-token paging over name-ordered entities.
//!
//! Entries are offered to a [`PageBuilder`] in strict name order, starting
//! strictly after the continuation token. In hierarchical mode every run of
//! names sharing a prefix up to the next delimiter collapses into one
//! `BlobPrefix` entry.
//!
//! Page boundaries are filled greedily from left to right. Items and new
//! prefixes each count once toward the page size. Once the page is full,
//! entries that belong to the prefix already on the page, or that repeat
//! the last item's name, are still absorbed so the token moves past them;
//! the first entry that would add anything new ends the page. The token is
//! the last absorbed name, or empty when nothing remains.

use crate::error::{ErrorCode, StorageError, StorageResult};

/// Default and maximum page size.
pub const DEFAULT_MAX_RESULTS: usize = 5000;

/// Resolves the `maxresults` query parameter.
pub fn effective_max_results(requested: Option<usize>) -> StorageResult<usize> {
    match requested {
        None => Ok(DEFAULT_MAX_RESULTS),
        Some(0) => Err(StorageError::with_message(
            ErrorCode::InvalidQueryParameterValue,
            "maxresults must be greater than zero.",
        )),
        Some(n) => Ok(n.min(DEFAULT_MAX_RESULTS)),
    }
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry<T> {
    Item(T),
    Prefix(String),
}

/// A page of results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub entries: Vec<ListEntry<T>>,
    /// Empty when the listing is complete.
    pub next_marker: String,
}

impl<T> Page<T> {
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().filter_map(|e| match e {
            ListEntry::Item(item) => Some(item),
            ListEntry::Prefix(_) => None,
        })
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| match e {
            ListEntry::Prefix(prefix) => Some(prefix.as_str()),
            ListEntry::Item(_) => None,
        })
    }

    pub fn into_items(self) -> Vec<T> {
        self.entries
            .into_iter()
            .filter_map(|e| match e {
                ListEntry::Item(item) => Some(item),
                ListEntry::Prefix(_) => None,
            })
            .collect()
    }

    pub fn is_last(&self) -> bool {
        self.next_marker.is_empty()
    }
}

/// Accumulates one page from entries offered in name order.
#[derive(Debug)]
pub struct PageBuilder<T> {
    prefix: String,
    delimiter: Option<String>,
    max_results: usize,
    entries: Vec<ListEntry<T>>,
    counted: usize,
    current_prefix: Option<String>,
    marker: Option<String>,
    closed: bool,
}

impl<T> PageBuilder<T> {
    pub fn new(prefix: Option<&str>, delimiter: Option<&str>, max_results: usize) -> Self {
        Self {
            prefix: prefix.unwrap_or_default().to_string(),
            delimiter: delimiter.filter(|d| !d.is_empty()).map(str::to_string),
            max_results,
            entries: Vec::new(),
            counted: 0,
            current_prefix: None,
            marker: None,
            closed: false,
        }
    }

    /// Whether the page refused an entry; offering more is pointless.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_full(&self) -> bool {
        self.counted >= self.max_results
    }

    fn group_of(&self, name: &str) -> Option<String> {
        let delimiter = self.delimiter.as_deref()?;
        let rest = name.strip_prefix(self.prefix.as_str())?;
        rest.find(delimiter)
            .map(|idx| name[..self.prefix.len() + idx + delimiter.len()].to_string())
    }

    /// Offers the next entry. Returns `false` once the page is complete, in
    /// which case `item` was not consumed.
    pub fn offer(&mut self, name: &str, item: T) -> bool {
        if self.closed {
            return false;
        }
        if !name.starts_with(self.prefix.as_str()) {
            return true;
        }

        match self.group_of(name) {
            Some(group) => {
                if self.current_prefix.as_deref() != Some(group.as_str()) {
                    if self.is_full() {
                        self.closed = true;
                        return false;
                    }
                    self.entries.push(ListEntry::Prefix(group.clone()));
                    self.current_prefix = Some(group);
                    self.counted += 1;
                }
            }
            None => {
                let repeats_last = self.marker.as_deref() == Some(name);
                if !repeats_last {
                    if self.is_full() {
                        self.closed = true;
                        return false;
                    }
                    self.counted += 1;
                }
                self.entries.push(ListEntry::Item(item));
            }
        }

        self.marker = Some(name.to_string());
        true
    }

    /// Completes the page. The token is set only when an entry was refused.
    pub fn finish(self) -> Page<T> {
        let next_marker = if self.closed {
            self.marker.unwrap_or_default()
        } else {
            String::new()
        };
        Page {
            entries: self.entries,
            next_marker,
        }
    }
}

/// Pages over an in-memory, name-sorted slice. Used where the full candidate
/// set is already materialized.
pub fn paginate<T: Clone>(
    sorted: &[(String, T)],
    prefix: Option<&str>,
    delimiter: Option<&str>,
    marker: Option<&str>,
    max_results: usize,
) -> Page<T> {
    let mut builder = PageBuilder::new(prefix, delimiter, max_results);
    let after = marker.filter(|m| !m.is_empty());
    for (name, item) in sorted {
        if after.is_some_and(|m| name.as_str() <= m) {
            continue;
        }
        if !builder.offer(name, item.clone()) {
            break;
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<(String, String)> {
        let mut v: Vec<_> = list.iter().map(|n| (n.to_string(), n.to_string())).collect();
        v.sort();
        v
    }

    #[test]
    fn test_flat_pages_four_four_two() {
        let all = names(&[
            "blob-09", "blob-03", "blob-07", "blob-01", "blob-05", "blob-02", "blob-10",
            "blob-04", "blob-08", "blob-06",
        ]);
        let mut marker = String::new();
        let mut sizes = Vec::new();
        let mut seen = Vec::new();
        loop {
            let page = paginate(&all, None, None, Some(marker.as_str()), 4);
            sizes.push(page.entries.len());
            seen.extend(page.items().cloned());
            if page.is_last() {
                break;
            }
            marker = page.next_marker;
        }
        assert_eq!(sizes, vec![4, 4, 2]);
        let expected: Vec<_> = all.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_exact_fit_returns_empty_token() {
        let all = names(&["a", "b", "c", "d"]);
        let page = paginate(&all, None, None, None, 4);
        assert_eq!(page.entries.len(), 4);
        assert!(page.is_last());
    }

    #[test]
    fn test_prefix_filter() {
        let all = names(&["logs/a", "logs/b", "data/x", "logsz"]);
        let page = paginate(&all, Some("logs/"), None, None, 10);
        let items: Vec<_> = page.items().cloned().collect();
        assert_eq!(items, vec!["logs/a", "logs/b"]);
    }

    #[test]
    fn test_delimiter_collapses_groups() {
        let all = names(&["a/1", "a/2", "a/3", "b", "c/1", "d"]);
        let page = paginate(&all, None, Some("/"), None, 10);
        assert_eq!(
            page.entries,
            vec![
                ListEntry::Prefix("a/".into()),
                ListEntry::Item("b".into()),
                ListEntry::Prefix("c/".into()),
                ListEntry::Item("d".into()),
            ]
        );
        assert!(page.is_last());
    }

    #[test]
    fn test_delimiter_below_prefix() {
        let all = names(&["photos/2023/a.jpg", "photos/2023/b.jpg", "photos/2024/c.jpg", "photos/top.jpg"]);
        let page = paginate(&all, Some("photos/"), Some("/"), None, 10);
        let prefixes: Vec<_> = page.prefixes().collect();
        assert_eq!(prefixes, vec!["photos/2023/", "photos/2024/"]);
        assert_eq!(page.items().count(), 1);
    }

    #[test]
    fn test_group_absorbed_at_page_boundary() {
        let all = names(&["a", "b/1", "b/2", "b/3", "c"]);

        let first = paginate(&all, None, Some("/"), None, 2);
        assert_eq!(
            first.entries,
            vec![ListEntry::Item("a".into()), ListEntry::Prefix("b/".into())]
        );
        // The token moved past the whole group.
        assert_eq!(first.next_marker, "b/3");

        let second = paginate(&all, None, Some("/"), Some(first.next_marker.as_str()), 2);
        assert_eq!(second.entries, vec![ListEntry::Item("c".into())]);
        assert!(second.is_last());
    }

    #[test]
    fn test_same_name_never_split() {
        let mut builder = PageBuilder::new(None, None, 1);
        assert!(builder.offer("x", 1));
        assert!(builder.offer("x", 2));
        assert!(!builder.offer("y", 3));
        let page = builder.finish();
        assert_eq!(page.into_items(), vec![1, 2]);
    }

    #[test]
    fn test_effective_max_results() {
        assert_eq!(effective_max_results(None).unwrap(), DEFAULT_MAX_RESULTS);
        assert_eq!(effective_max_results(Some(10_000)).unwrap(), DEFAULT_MAX_RESULTS);
        assert_eq!(effective_max_results(Some(7)).unwrap(), 7);
        assert!(effective_max_results(Some(0)).is_err());
    }
}
