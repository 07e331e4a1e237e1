use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, TermQuery, TermSetQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, instrument, warn};

use recall_core::config::LexicalSettings;
use recall_core::error::{Error, Result};
use recall_core::{Chunk, ChunkStore, Filter, SearchHit, SourceKind};

use crate::tantivy_utils::{build_schema, register_tokenizer, LexicalFields, TEXT_ANALYZER};

/// BM25 index over chunk text.
///
/// Every mutation commits and reloads the reader before returning, so a
/// search issued after `upsert`/`delete` returns observes it.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: LexicalFields,
    store: Arc<ChunkStore>,
}

impl LexicalIndex {
    pub fn in_memory(store: Arc<ChunkStore>, settings: &LexicalSettings) -> Result<Self> {
        let (schema, fields) = build_schema();
        Self::from_index(Index::create_in_ram(schema), fields, store, settings)
    }

    /// Creates a fresh on-disk index, discarding whatever `index_dir` held.
    pub fn create_in_dir(index_dir: &Path, store: Arc<ChunkStore>, settings: &LexicalSettings) -> Result<Self> {
        let (schema, fields) = build_schema();
        if index_dir.exists() {
            std::fs::remove_dir_all(index_dir).map_err(index_err)?;
        }
        std::fs::create_dir_all(index_dir).map_err(index_err)?;
        let index = Index::create_in_dir(index_dir, schema).map_err(index_err)?;
        Self::from_index(index, fields, store, settings)
    }

    /// On disk when `settings.index_dir` is set, in RAM otherwise.
    pub fn from_settings(store: Arc<ChunkStore>, settings: &LexicalSettings) -> Result<Self> {
        match settings.index_dir() {
            Some(dir) => Self::create_in_dir(&dir, store, settings),
            None => Self::in_memory(store, settings),
        }
    }

    fn from_index(index: Index, fields: LexicalFields, store: Arc<ChunkStore>, settings: &LexicalSettings) -> Result<Self> {
        register_tokenizer(&index);
        // One indexing thread keeps segment and doc order deterministic.
        let writer: IndexWriter = index
            .writer_with_num_threads(1, settings.writer_heap_bytes)
            .map_err(index_err)?;
        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_err)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
            store,
        })
    }

    #[instrument(skip(self, chunk), fields(id = %chunk.id))]
    pub fn upsert(&self, chunk: &Chunk) -> Result<()> {
        self.upsert_many(std::slice::from_ref(chunk))
    }

    /// Replaces the postings of every chunk in one commit.
    pub fn upsert_many<C: AsRef<Chunk>>(&self, chunks: &[C]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        let staged = chunks.iter().try_for_each(|chunk| {
            let chunk = chunk.as_ref();
            writer.delete_term(Term::from_field_text(self.fields.id, &chunk.id));
            writer
                .add_document(doc!(
                    self.fields.id => chunk.id.clone(),
                    self.fields.source_document_id => chunk.source_document_id.clone(),
                    self.fields.text => chunk.text.clone(),
                ))
                .map(|_| ())
        });
        self.commit(&mut writer, staged.map_err(index_err))?;
        debug!(chunks = chunks.len(), "lexical postings updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        self.commit(&mut writer, Ok(()))
    }

    /// Commits staged operations and makes them visible, or rolls them back.
    fn commit(&self, writer: &mut IndexWriter, staged: Result<()>) -> Result<()> {
        let committed = staged.and_then(|()| writer.commit().map(|_| ()).map_err(index_err));
        if let Err(e) = committed {
            if let Err(rollback) = writer.rollback() {
                warn!(error = %rollback, "lexical rollback failed after commit error");
            }
            return Err(e);
        }
        self.reader.reload().map_err(index_err)
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Unique analyzed terms of `text`, in first-occurrence order.
    pub fn analyze(&self, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self
            .index
            .tokenizers()
            .get(TEXT_ANALYZER)
            .ok_or_else(|| Error::Index(format!("tokenizer {TEXT_ANALYZER} is not registered")))?;
        let mut stream = analyzer.token_stream(text);
        let mut terms: Vec<String> = Vec::new();
        while stream.advance() {
            let term = &stream.token().text;
            if !terms.contains(term) {
                terms.push(term.clone());
            }
        }
        Ok(terms)
    }

    /// Top `k` chunks by BM25 among those satisfying `filter`.
    #[instrument(skip(self, filter), fields(filtered = !filter.is_empty()))]
    pub fn search(&self, text: &str, filter: &Filter, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let terms = self.analyze(text)?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let should: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|t| {
                let term = Term::from_field_text(self.fields.text, t);
                (Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)) as Box<dyn Query>)
            })
            .collect();
        let text_query: Box<dyn Query> = Box::new(BooleanQuery::new(should));

        let query: Box<dyn Query> = if filter.is_empty() {
            text_query
        } else {
            let eligible = self.store.matching(filter);
            if eligible.is_empty() {
                return Ok(Vec::new());
            }
            let ids = eligible.iter().map(|c| Term::from_field_text(self.fields.id, &c.id));
            let gate = ConstScoreQuery::new(Box::new(TermSetQuery::new(ids)), 0.0);
            Box::new(BooleanQuery::new(vec![(Occur::Must, text_query), (Occur::Must, Box::new(gate) as Box<dyn Query>)]))
        };

        let searcher = self.reader.searcher();
        // Headroom so score ties at the cut-off resolve by id, not doc address.
        let limit = k.saturating_mul(2);
        let top_docs = searcher.search(&*query, &TopDocs::with_limit(limit)).map_err(index_err)?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(index_err)?;
            if let Some(id) = doc.get_first(self.fields.id).and_then(|v| v.as_str()) {
                hits.push(SearchHit::new(id, score, SourceKind::Lexical));
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        debug!(terms = terms.len(), hits = hits.len(), "lexical search");
        Ok(hits)
    }
}

fn index_err(e: impl std::fmt::Display) -> Error {
    Error::Index(e.to_string())
}
