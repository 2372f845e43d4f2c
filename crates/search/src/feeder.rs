//! Feeding archived documents to the full-text engine and querying it back.
//!
//! Ranking, tokenizing and storage all belong to `tantivy`; this module only
//! maps documents onto the schema, keeps the version marker current and
//! shapes results.

use std::collections::BTreeMap;
use std::fs;
use std::ops::Deref;
use std::path::Path;

use exn::ResultExt;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Value};
use tantivy::snippet::SnippetGenerator;
use tantivy::{
    DocId as SegmentDocId, Index, IndexReader, IndexWriter, ReloadPolicy, Score, SegmentReader, TantivyDocument,
    Term,
};
use tracing::instrument;
use trawl_extract::markup::visible_text;

use crate::error::{ErrorKind, Result};
use crate::schema::{IndexSchema, KIND_DOCUMENT, KIND_VERSION, SCHEMA_VERSION};

/// Characters of context in a highlighted snippet.
const SNIPPET_MAX_CHARS: usize = 200;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Archive id of the document.
    pub id: u64,
    pub uri: String,
    pub title: String,
    /// Matching text with `<b>` highlighting.
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Documents matching the query, not just those returned.
    pub total: usize,
    pub hits: Vec<SearchHit>,
}

/// Whether the index was built with the current schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionStatus {
    Current,
    /// Nothing has been indexed yet.
    Missing,
    /// Built against another version; holds the version found.
    Mismatch(String),
}

/// Read side of the index.
#[derive(Clone)]
pub struct SearchIndex {
    index: Index,
    fields: IndexSchema,
    reader: IndexReader,
    parser: QueryParser,
}

impl SearchIndex {
    /// Open the index in `dir`, creating it if needed.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let open_error = || ErrorKind::Open(dir.to_path_buf());
        fs::create_dir_all(dir).or_raise(open_error)?;
        let fields = IndexSchema::new();
        let directory = MmapDirectory::open(dir).or_raise(open_error)?;
        let index = Index::open_or_create(directory, fields.schema.clone()).or_raise(open_error)?;
        Self::with_fields(index, fields)
    }

    /// A throwaway index held in memory.
    pub fn in_memory() -> Result<Self> {
        Self::from_index(Index::create_in_ram(IndexSchema::new().schema))
    }

    /// Wrap an index created with [`IndexSchema`].
    pub fn from_index(index: Index) -> Result<Self> {
        Self::with_fields(index, IndexSchema::new())
    }

    fn with_fields(index: Index, fields: IndexSchema) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .or_raise(|| ErrorKind::Search)?;
        let parser = QueryParser::for_index(&index, vec![fields.title, fields.text]);
        Ok(Self {
            index,
            fields,
            reader,
            parser,
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn fields(&self) -> &IndexSchema {
        &self.fields
    }

    /// Start writing. Only one feeder may exist per index at a time.
    pub fn feeder(&self, writer_memory_bytes: usize) -> Result<IndexFeeder> {
        let writer: IndexWriter = self.index.writer(writer_memory_bytes).or_raise(|| ErrorKind::Write)?;
        Ok(IndexFeeder {
            search: self.clone(),
            writer,
            marker_written: false,
        })
    }

    /// Run `query` and return hits `start..end` of the ranked results.
    ///
    /// Ranking is by score; equal scores put the most recently archived
    /// document first. Version markers never match.
    #[instrument(skip(self), fields(total))]
    pub fn search(&self, query: &str, start: usize, end: usize) -> Result<SearchResults> {
        let parsed = self.parser.parse_query(query).or_raise(|| ErrorKind::Query(query.to_string()))?;
        let marker: Box<dyn Query> = Box::new(self.kind_query(KIND_VERSION));
        let query = BooleanQuery::new(vec![(Occur::Must, parsed), (Occur::MustNot, marker)]);

        let searcher = self.reader.searcher();
        let total = searcher.search(&query, &Count).or_raise(|| ErrorKind::Search)?;
        tracing::Span::current().record("total", total);
        let limit = end.saturating_sub(start);
        if limit == 0 || start >= total {
            return Ok(SearchResults { total, hits: Vec::new() });
        }

        let collector = TopDocs::with_limit(limit).and_offset(start).tweak_score(|segment: &SegmentReader| {
            let ids = segment.fast_fields().u64("id").ok();
            move |doc: SegmentDocId, score: Score| (score, ids.as_ref().and_then(|ids| ids.first(doc)).unwrap_or(0))
        });
        let top = searcher.search(&query, &collector).or_raise(|| ErrorKind::Search)?;

        let snippets = SnippetGenerator::create(&searcher, &query, self.fields.text)
            .map(|mut generator| {
                generator.set_max_num_chars(SNIPPET_MAX_CHARS);
                generator
            })
            .ok();
        let mut hits = Vec::with_capacity(top.len());
        for ((score, id), address) in top {
            let doc: TantivyDocument = searcher.doc(address).or_raise(|| ErrorKind::Search)?;
            let text = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let snippet = snippets
                .as_ref()
                .map(|generator| generator.snippet_from_doc(&doc).to_html())
                .filter(|snippet| !snippet.is_empty())
                .unwrap_or_else(|| text(self.fields.title));
            hits.push(SearchHit {
                id,
                uri: text(self.fields.uri),
                title: text(self.fields.title),
                snippet,
                score,
            });
        }
        Ok(SearchResults { total, hits })
    }

    /// Check the version marker against [`SCHEMA_VERSION`].
    pub fn version_status(&self) -> Result<VersionStatus> {
        let searcher = self.reader.searcher();
        let top = searcher
            .search(&self.kind_query(KIND_VERSION), &TopDocs::with_limit(1))
            .or_raise(|| ErrorKind::Search)?;
        let Some((_, address)) = top.into_iter().next() else {
            return Ok(VersionStatus::Missing);
        };
        let doc: TantivyDocument = searcher.doc(address).or_raise(|| ErrorKind::Search)?;
        let found = doc.get_first(self.fields.version).and_then(|v| v.as_str()).unwrap_or_default();
        Ok(match found == SCHEMA_VERSION {
            true => VersionStatus::Current,
            false => VersionStatus::Mismatch(found.to_string()),
        })
    }

    /// Whether a document from captured message `message` is indexed.
    pub fn contains_message(&self, message: &str) -> Result<bool> {
        let term = Term::from_field_text(self.fields.message, message);
        self.count(&TermQuery::new(term, IndexRecordOption::Basic)).map(|n| n > 0)
    }

    /// Whether archive document `id` is indexed.
    pub fn contains_document(&self, id: u64) -> Result<bool> {
        let term = Term::from_field_u64(self.fields.id, id);
        self.count(&TermQuery::new(term, IndexRecordOption::Basic)).map(|n| n > 0)
    }

    /// Indexed documents, not counting the version marker.
    pub fn num_documents(&self) -> Result<usize> {
        self.count(&self.kind_query(KIND_DOCUMENT))
    }

    fn count(&self, query: &dyn Query) -> Result<usize> {
        self.reader.searcher().search(query, &Count).or_raise(|| ErrorKind::Search)
    }

    fn kind_query(&self, kind: &str) -> TermQuery {
        TermQuery::new(Term::from_field_text(self.fields.kind, kind), IndexRecordOption::Basic)
    }
}

/// Write side of the index. Nothing added is searchable until
/// [`commit`](Self::commit).
pub struct IndexFeeder {
    search: SearchIndex,
    writer: IndexWriter,
    marker_written: bool,
}

impl IndexFeeder {
    /// Add a distilled document under archive id `id`.
    ///
    /// `uri`, `title`, `date` and `message` are taken from `meta`; the
    /// searchable text is `content` with its markup removed.
    #[instrument(skip(self, meta, content), fields(content_size = content.len()))]
    pub fn add_document(&mut self, id: u64, meta: &BTreeMap<String, String>, content: &str) -> Result<()> {
        self.ensure_version_marker()?;
        let fields = &self.search.fields;
        let get = |key: &str| meta.get(key).map(String::as_str).unwrap_or_default();
        let mut document = TantivyDocument::default();
        document.add_u64(fields.id, id);
        document.add_text(fields.uri, get("uri"));
        document.add_text(fields.title, get("title"));
        document.add_text(fields.date, get("date"));
        document.add_text(fields.message, get("message"));
        document.add_text(fields.text, visible_text(content));
        document.add_text(fields.kind, KIND_DOCUMENT);
        self.writer.add_document(document).or_raise(|| ErrorKind::Write)?;
        Ok(())
    }

    /// Make everything added so far durable and searchable.
    pub fn commit(&mut self) -> Result<()> {
        self.writer.commit().or_raise(|| ErrorKind::Write)?;
        self.search.reader.reload().or_raise(|| ErrorKind::Search)?;
        Ok(())
    }

    /// Throw away everything added since the last commit.
    pub fn rollback(&mut self) -> Result<()> {
        self.writer.rollback().or_raise(|| ErrorKind::Write)?;
        self.marker_written = false;
        Ok(())
    }

    /// Replace any existing version marker with the current one, once per
    /// feeder.
    fn ensure_version_marker(&mut self) -> Result<()> {
        if self.marker_written {
            return Ok(());
        }
        let fields = &self.search.fields;
        self.writer.delete_term(Term::from_field_text(fields.kind, KIND_VERSION));
        let mut marker = TantivyDocument::default();
        marker.add_text(fields.kind, KIND_VERSION);
        marker.add_text(fields.version, SCHEMA_VERSION);
        self.writer.add_document(marker).or_raise(|| ErrorKind::Write)?;
        self.marker_written = true;
        tracing::debug!(version = SCHEMA_VERSION, "wrote index version marker");
        Ok(())
    }
}

impl Deref for IndexFeeder {
    type Target = SearchIndex;

    fn deref(&self) -> &Self::Target {
        &self.search
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMORY: usize = 20_000_000;

    fn meta(uri: &str, title: &str, message: &str) -> BTreeMap<String, String> {
        [("uri", uri), ("title", title), ("message", message)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_uncommitted_documents_are_not_searchable() {
        let search = SearchIndex::in_memory().unwrap();
        let mut feeder = search.feeder(MEMORY).unwrap();
        feeder.add_document(1, &meta("http://a/", "Apples", "m1"), "<p>red apples</p>").unwrap();
        assert_eq!(search.search("apples", 0, 10).unwrap().total, 0);
        assert!(!search.contains_message("m1").unwrap());

        feeder.commit().unwrap();
        let results = search.search("apples", 0, 10).unwrap();
        assert_eq!(results.total, 1);
        assert_eq!(results.hits[0].id, 1);
        assert_eq!(results.hits[0].uri, "http://a/");
        assert_eq!(results.hits[0].title, "Apples");
        assert!(results.hits[0].snippet.contains("<b>apples</b>"), "{}", results.hits[0].snippet);
        assert!(search.contains_message("m1").unwrap());
        assert!(search.contains_document(1).unwrap());
        assert!(!search.contains_document(2).unwrap());
    }

    #[test]
    fn test_ties_rank_newest_first() {
        let search = SearchIndex::in_memory().unwrap();
        let mut feeder = search.feeder(MEMORY).unwrap();
        for id in 1..=3 {
            feeder.add_document(id, &meta("http://same/", "Same", "m"), "<p>identical words</p>").unwrap();
        }
        feeder.commit().unwrap();
        let results = search.search("identical", 0, 10).unwrap();
        let ids: Vec<u64> = results.hits.iter().map(|hit| hit.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let page = search.search("identical", 1, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.hits.iter().map(|hit| hit.id).collect::<Vec<_>>(), vec![2]);
        assert!(search.search("identical", 5, 10).unwrap().hits.is_empty());
    }

    #[test]
    fn test_rollback_discards_uncommitted() {
        let search = SearchIndex::in_memory().unwrap();
        let mut feeder = search.feeder(MEMORY).unwrap();
        feeder.add_document(1, &meta("http://a/", "A", "m1"), "discarded").unwrap();
        feeder.rollback().unwrap();
        feeder.add_document(2, &meta("http://b/", "B", "m2"), "kept").unwrap();
        feeder.commit().unwrap();
        assert_eq!(search.search("discarded", 0, 10).unwrap().total, 0);
        assert_eq!(search.search("kept", 0, 10).unwrap().total, 1);
        assert_eq!(search.version_status().unwrap(), VersionStatus::Current);
    }

    #[test]
    fn test_markup_is_not_indexed() {
        let search = SearchIndex::in_memory().unwrap();
        let mut feeder = search.feeder(MEMORY).unwrap();
        feeder
            .add_document(1, &meta("http://a/", "", "m"), "<div class=\"hidden\">shown</div><script>secret()</script>")
            .unwrap();
        feeder.commit().unwrap();
        assert_eq!(search.search("shown", 0, 10).unwrap().total, 1);
        assert_eq!(search.search("hidden", 0, 10).unwrap().total, 0);
        assert_eq!(search.search("secret", 0, 10).unwrap().total, 0);
    }

    #[test]
    fn test_version_marker() {
        let index = Index::create_in_ram(IndexSchema::new().schema);
        {
            let fields = IndexSchema::new();
            let mut writer: IndexWriter = index.writer(MEMORY).unwrap();
            let mut old = TantivyDocument::default();
            old.add_text(fields.kind, KIND_VERSION);
            old.add_text(fields.version, "trawl-index-0");
            writer.add_document(old).unwrap();
            writer.commit().unwrap();
        }
        let search = SearchIndex::from_index(index).unwrap();
        search.reader.reload().unwrap();
        assert_eq!(search.version_status().unwrap(), VersionStatus::Mismatch("trawl-index-0".to_string()));

        let mut feeder = search.feeder(MEMORY).unwrap();
        feeder.add_document(1, &meta("http://a/", "A", "m"), "version").unwrap();
        feeder.add_document(2, &meta("http://b/", "B", "n"), "version").unwrap();
        feeder.commit().unwrap();
        assert_eq!(search.version_status().unwrap(), VersionStatus::Current);
        assert_eq!(search.num_documents().unwrap(), 2);
        // The marker itself never shows up.
        assert_eq!(search.search("kind:version", 0, 10).unwrap().total, 0);
    }

    #[test]
    fn test_empty_index() {
        let search = SearchIndex::in_memory().unwrap();
        assert_eq!(search.version_status().unwrap(), VersionStatus::Missing);
        assert_eq!(search.search("anything", 0, 10).unwrap(), SearchResults::default());
    }

    #[test]
    fn test_invalid_query() {
        let search = SearchIndex::in_memory().unwrap();
        let err = search.search("nosuchfield:value", 0, 10).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Query(_)));
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let search = SearchIndex::open(dir.path()).unwrap();
            let mut feeder = search.feeder(MEMORY).unwrap();
            feeder.add_document(7, &meta("http://a/", "Kept", "m7"), "durable").unwrap();
            feeder.commit().unwrap();
        }
        let search = SearchIndex::open(dir.path()).unwrap();
        assert_eq!(search.search("durable", 0, 10).unwrap().hits[0].id, 7);
        assert_eq!(search.version_status().unwrap(), VersionStatus::Current);
    }
}
