//! Tantivy-based search index module.
//!
//! Provides full-text search over analyses by material, file name and notes.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Analysis;

/// Field boost values.
const BOOST_MATERIAL: f32 = 8.0;
const BOOST_FILE_NAME: f32 = 6.0;
const BOOST_NOTES: f32 = 4.0;

/// Search result with analysis id and relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub analysis_id: String,
    pub score: f32,
}

/// One page of hits plus the number of analyses matching overall.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<SearchResult>,
    pub total: usize,
}

/// Search index schema fields.
struct SearchFields {
    analysis_id: Field,
    material_name: Field,
    file_name: Field,
    notes: Field,
}

/// Tantivy search index for analyses.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        // Define schema
        let mut schema_builder = Schema::builder();
        let analysis_id = schema_builder.add_text_field("analysis_id", STRING | STORED);
        let material_name = schema_builder.add_text_field("material_name", TEXT);
        let file_name = schema_builder.add_text_field("file_name", TEXT);
        let notes = schema_builder.add_text_field("notes", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            analysis_id,
            material_name,
            file_name,
            notes,
        };

        // Try to open existing index or create new one
        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            fields,
        })
    }

    /// Rebuild the entire index from analyses.
    pub async fn rebuild(&self, analyses: &[Analysis]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        // Clear existing index
        writer.delete_all_documents()?;

        for analysis in analyses {
            writer.add_document(self.create_document(analysis))?;
        }

        writer.commit()?;

        // Reload reader to see new documents
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} analyses", analyses.len());
        Ok(())
    }

    /// Index a single analysis.
    pub async fn index_analysis(&self, analysis: &Analysis) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        // Delete existing document if any
        let term = tantivy::Term::from_field_text(self.fields.analysis_id, &analysis.id);
        writer.delete_term(term);

        writer.add_document(self.create_document(analysis))?;
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Remove an analysis from the index.
    pub async fn remove_analysis(&self, analysis_id: &str) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        let term = tantivy::Term::from_field_text(self.fields.analysis_id, analysis_id);
        writer.delete_term(term);
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Search for analyses matching the query.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<SearchPage, AppError> {
        if query_str.trim().is_empty() {
            return Ok(SearchPage::default());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![
                self.fields.material_name,
                self.fields.file_name,
                self.fields.notes,
            ],
        );

        let base_query = query_parser
            .parse_query(query_str)
            .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        // Create field-specific boosted queries
        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();

        let field_queries = [
            (self.fields.material_name, BOOST_MATERIAL),
            (self.fields.file_name, BOOST_FILE_NAME),
            (self.fields.notes, BOOST_NOTES),
        ];

        for (field, boost) in field_queries {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                let boosted = BoostQuery::new(field_query, boost);
                subqueries.push((Occur::Should, Box::new(boosted)));
            }
        }

        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        // Never ask for more documents than the index holds.
        let available = searcher.num_docs() as usize;
        let fetch = limit.saturating_add(offset).min(available);
        if limit == 0 || offset >= fetch {
            let total = searcher
                .search(&combined_query, &Count)
                .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;
            return Ok(SearchPage {
                hits: Vec::new(),
                total,
            });
        }

        let (top_docs, total) = searcher
            .search(&combined_query, &(TopDocs::with_limit(fetch), Count))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let hits: Vec<SearchResult> = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let analysis_id = doc
                    .get_first(self.fields.analysis_id)?
                    .as_str()?
                    .to_string();
                Some(SearchResult { analysis_id, score })
            })
            .collect();

        Ok(SearchPage { hits, total })
    }

    /// Create a Tantivy document from an analysis.
    fn create_document(&self, analysis: &Analysis) -> TantivyDocument {
        // Split "ferrite_500x.png" into searchable words.
        let file_words = analysis.file_name.replace(['_', '-', '.'], " ");

        doc!(
            self.fields.analysis_id => analysis.id.clone(),
            self.fields.material_name => analysis.material_name.clone(),
            self.fields.file_name => file_words,
            self.fields.notes => analysis.notes.clone().unwrap_or_default()
        )
    }
}
