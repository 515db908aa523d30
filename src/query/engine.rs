//! Query Engine
//!
//! Runs a [`Query`] against one consistent view of the index and the
//! record files. The caller holds the store lock for the duration.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::Result;
use crate::index::{IndexEntry, IndexManager};
use crate::record::RecordStore;

use super::filter::{Clause, FieldSource, Filter};
use super::{Query, QueryResult, SortSpec};

/// A matching record, loaded lazily
struct Candidate<'a> {
    entry: &'a IndexEntry,
    doc: Option<Value>,
}

impl FieldSource for Candidate<'_> {
    fn field(&self, path: &str) -> Option<&Value> {
        match &self.doc {
            Some(doc) => doc.field(path),
            None => self.entry.field(path),
        }
    }
}

/// Evaluates queries over an index snapshot
pub struct QueryEngine<'a> {
    index: &'a IndexManager,
    records: &'a RecordStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a IndexManager, records: &'a RecordStore) -> Self {
        Self { index, records }
    }

    pub fn run(&self, query: &Query) -> Result<QueryResult> {
        self.find(&query.filter, query.sort.as_ref(), query.limit, query.offset)
    }

    /// Filter, sort, then paginate
    ///
    /// `total_count` is the size of the filtered set before `offset` and
    /// `limit` apply.
    pub fn find(
        &self,
        filter: &Filter,
        sort: Option<&SortSpec>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<QueryResult> {
        let (indexed, rest): (Vec<&Clause>, Vec<&Clause>) = filter
            .clauses()
            .iter()
            .partition(|c| c.paths().iter().all(|p| self.index.covers(p)));
        let sort_indexed = sort.map_or(true, |s| self.index.covers(&s.field));
        let load_docs = !rest.is_empty() || !sort_indexed;

        // Narrow on the index first; only survivors are read from disk.
        let mut narrowed = 0;
        let mut matched = Vec::new();
        for entry in self.index.entries() {
            if !indexed.iter().all(|c| c.matches(entry)) {
                continue;
            }
            narrowed += 1;
            let doc = if load_docs {
                Some(self.records.read(&entry.id)?)
            } else {
                None
            };
            let candidate = Candidate { entry, doc };
            if rest.iter().all(|c| c.matches(&candidate)) {
                matched.push(candidate);
            }
        }

        tracing::trace!(
            scanned = self.index.len(),
            narrowed,
            matched = matched.len(),
            load_docs,
            "query evaluated"
        );

        // Index iteration is already in id order, so a stable sort keeps
        // ties ordered by id.
        if let Some(sort) = sort {
            matched.sort_by(|a, b| by_key(sort, a, b));
        }

        let total_count = matched.len();
        let page = matched
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX));

        let mut records = Vec::new();
        for candidate in page {
            records.push(match candidate.doc {
                Some(doc) => doc,
                None => self.records.read(&candidate.entry.id)?,
            });
        }

        Ok(QueryResult {
            records,
            total_count,
        })
    }

}

fn by_key(sort: &SortSpec, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    sort.compare(a.field(&sort.field), b.field(&sort.field))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncStrategy;
    use crate::query::Filter;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture(temp: &TempDir) -> (IndexManager, RecordStore) {
        let records = RecordStore::open(&temp.path().join("records"), SyncStrategy::OsBuffered).unwrap();
        let mut index = IndexManager::new(
            &temp.path().join("index.json"),
            vec!["brand".to_string(), "price.amount".to_string()],
            SyncStrategy::OsBuffered,
        );
        let docs = vec![
            json!({"id": "a", "brand": "Acme", "price": {"amount": 30}, "color": "red"}),
            json!({"id": "b", "brand": "Acme", "price": {"amount": 10}, "color": "blue"}),
            json!({"id": "c", "brand": "Other", "price": {"amount": 20}}),
            json!({"id": "d", "brand": "Acme", "color": "red"}),
        ];
        let mut pairs = Vec::new();
        for doc in docs {
            let id = doc["id"].as_str().unwrap().to_string();
            records.write(&id, &doc).unwrap();
            pairs.push((id, doc));
        }
        index.rebuild(pairs).unwrap();
        (index, records)
    }

    #[test]
    fn test_indexed_filter_and_sort() {
        let temp = TempDir::new().unwrap();
        let (index, records) = fixture(&temp);
        let engine = QueryEngine::new(&index, &records);

        let result = engine
            .find(
                &Filter::new().eq("brand", "Acme"),
                Some(&SortSpec::asc("price.amount")),
                None,
                0,
            )
            .unwrap();

        // missing price sorts last
        assert_eq!(result.ids(), vec!["b", "a", "d"]);
        assert_eq!(result.total_count, 3);
    }

    #[test]
    fn test_unindexed_field_loads_records() {
        let temp = TempDir::new().unwrap();
        let (index, records) = fixture(&temp);
        let engine = QueryEngine::new(&index, &records);

        let result = engine
            .find(&Filter::new().eq("color", "red"), Some(&SortSpec::desc("color")), None, 0)
            .unwrap();

        assert_eq!(result.ids(), vec!["a", "d"]);
    }

    #[test]
    fn test_mixed_filter_reads_only_index_survivors() {
        let temp = TempDir::new().unwrap();
        let (index, records) = fixture(&temp);
        // excluded by the brand clause, so never opened
        records.write_bytes("c", b"{broken").unwrap();
        let engine = QueryEngine::new(&index, &records);

        let result = engine
            .find(&Filter::new().eq("brand", "Acme").eq("color", "red"), None, None, 0)
            .unwrap();

        assert_eq!(result.ids(), vec!["a", "d"]);
        assert_eq!(result.total_count, 2);
    }

    #[test]
    fn test_pagination_reports_total_before_paging() {
        let temp = TempDir::new().unwrap();
        let (index, records) = fixture(&temp);
        let engine = QueryEngine::new(&index, &records);

        let result = engine
            .find(&Filter::new(), Some(&SortSpec::asc("id")), Some(2), 1)
            .unwrap();

        assert_eq!(result.ids(), vec!["b", "c"]);
        assert_eq!(result.total_count, 4);

        let past_end = engine.find(&Filter::new(), None, Some(2), 10).unwrap();
        assert!(past_end.records.is_empty());
        assert_eq!(past_end.total_count, 4);
    }
}
