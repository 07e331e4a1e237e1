use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED, STRING};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, StopWordFilter, TextAnalyzer};
use tantivy::Index;

/// Name under which the chunk text analyzer is registered.
pub const TEXT_ANALYZER: &str = "recall_text";

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

#[derive(Debug, Clone, Copy)]
pub struct LexicalFields {
    pub id: Field,
    pub source_document_id: Field,
    pub text: Field,
}

pub fn build_schema() -> (Schema, LexicalFields) {
    let mut schema_builder = Schema::builder();
    let id = schema_builder.add_text_field("id", STRING | STORED);
    let source_document_id = schema_builder.add_text_field("source_document_id", STRING | STORED);
    let text_field_indexing = TextFieldIndexing::default()
        .set_tokenizer(TEXT_ANALYZER)
        .set_index_option(IndexRecordOption::WithFreqsAndPositions);
    let text = schema_builder.add_text_field("text", TextOptions::default().set_indexing_options(text_field_indexing));
    (schema_builder.build(), LexicalFields { id, source_document_id, text })
}

pub fn text_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|s| (*s).to_string())))
        .build()
}

pub fn register_tokenizer(index: &Index) {
    index.tokenizers().register(TEXT_ANALYZER, text_analyzer());
}
