//! SQLite-backed [`Store`] implementation.
//!
//! Lexical search goes through the `chunks_fts` FTS5 table with a column
//! filter; vector search is a brute-force cosine scan over the stored
//! blobs.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docent_core::capability::DocumentCatalog;
use docent_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docent_core::models::{Chunk, DocFilter, Document};
use docent_core::store::{
    query_terms, ChunkCandidate, ChunkVectors, KeywordField, Store, VectorField,
};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn chunk_count(&self, file_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_name = ?")
            .bind(file_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Build `AND (c.doc_name IN (..) OR c.file_name IN (..))` for a filter,
/// returning the clause and the values to bind twice.
fn filter_clause(filter: &DocFilter) -> (String, &[String]) {
    match filter {
        DocFilter::All => (String::new(), &[]),
        DocFilter::Only(names) if names.is_empty() => (" AND 0".to_string(), &[]),
        DocFilter::Only(names) => {
            let placeholders = vec!["?"; names.len()].join(", ");
            (
                format!(
                    " AND (c.doc_name IN ({p}) OR c.file_name IN ({p}))",
                    p = placeholders
                ),
                names,
            )
        }
    }
}

/// FTS5 expression matching any term within the chosen columns.
fn match_expression(query: &str, fields: &[KeywordField]) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    let fields = if fields.is_empty() {
        KeywordField::DEFAULT
    } else {
        fields
    };
    let columns: Vec<&str> = fields.iter().map(|f| f.column()).collect();
    let any_term: Vec<String> = terms.iter().map(|t| format!("\"{}\"", t)).collect();
    Some(format!(
        "{{{}}} : ({})",
        columns.join(" "),
        any_term.join(" OR ")
    ))
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        file_name: row.get("file_name"),
        doc_name: row.get("doc_name"),
        doc_type: row.get("doc_type"),
        doc_description: row.get("doc_description"),
        manufacturer: row.get("manufacturer"),
        model: row.get("model"),
    }
}

fn candidate_from_row(row: &SqliteRow, raw_score: f64) -> ChunkCandidate {
    let page: i64 = row.get("page");
    ChunkCandidate {
        chunk_id: row.get("chunk_id"),
        file_name: row.get("file_name"),
        doc_name: row.get("doc_name"),
        page: page.max(0) as u32,
        text: row.get("text"),
        raw_score,
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO documents (file_name, doc_name, doc_type, doc_description,
                                   manufacturer, model, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_name) DO UPDATE SET
                doc_name = excluded.doc_name,
                doc_type = excluded.doc_type,
                doc_description = excluded.doc_description,
                manufacturer = excluded.manufacturer,
                model = excluded.model,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&doc.file_name)
        .bind(&doc.doc_name)
        .bind(&doc.doc_type)
        .bind(&doc.doc_description)
        .bind(&doc.manufacturer)
        .bind(&doc.model)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        file_name: &str,
        chunks: &[Chunk],
        vectors: &[ChunkVectors],
    ) -> Result<()> {
        if !vectors.is_empty() && vectors.len() != chunks.len() {
            bail!(
                "{} vector sets supplied for {} chunks of {}",
                vectors.len(),
                chunks.len(),
                file_name
            );
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE file_name = ?")
            .bind(file_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE file_name = ?")
            .bind(file_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE file_name = ?")
            .bind(file_name)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, file_name, chunk_index, page, h1, h2, h3, text,
                                    doc_name, doc_type, doc_description, manufacturer, model)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.file_name)
            .bind(chunk.chunk_index)
            .bind(chunk.page as i64)
            .bind(&chunk.h1)
            .bind(&chunk.h2)
            .bind(&chunk.h3)
            .bind(&chunk.text)
            .bind(&chunk.doc_name)
            .bind(&chunk.doc_type)
            .bind(&chunk.doc_description)
            .bind(&chunk.manufacturer)
            .bind(&chunk.model)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO chunks_fts (chunk_id, file_name, text, h1, h2, h3,
                                        doc_name, doc_type, manufacturer, model)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.file_name)
            .bind(&chunk.text)
            .bind(&chunk.h1)
            .bind(&chunk.h2)
            .bind(&chunk.h3)
            .bind(&chunk.doc_name)
            .bind(&chunk.doc_type)
            .bind(&chunk.manufacturer)
            .bind(&chunk.model)
            .execute(&mut *tx)
            .await?;

            let Some(vecs) = vectors.get(i) else {
                continue;
            };
            if vecs.vector.is_none() && vecs.context_vector.is_none() {
                continue;
            }
            let dims = vecs
                .vector
                .as_ref()
                .or(vecs.context_vector.as_ref())
                .map(|v| v.len())
                .unwrap_or(0);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, file_name, dims, vector, context_vector)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(file_name)
            .bind(dims as i64)
            .bind(vecs.vector.as_deref().map(vec_to_blob))
            .bind(vecs.context_vector.as_deref().map(vec_to_blob))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT file_name, doc_name, doc_type, doc_description, manufacturer, model
            FROM documents
            ORDER BY file_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    async fn get_document(&self, file_name: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT file_name, doc_name, doc_type, doc_description, manufacturer, model
            FROM documents
            WHERE file_name = ?
            "#,
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    async fn keyword_search(
        &self,
        query: &str,
        fields: &[KeywordField],
        limit: usize,
        filter: &DocFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let Some(expression) = match_expression(query, fields) else {
            return Ok(Vec::new());
        };
        let (clause, names) = filter_clause(filter);
        let sql = format!(
            r#"
            SELECT c.id AS chunk_id, c.file_name, c.doc_name, c.page, c.text,
                   chunks_fts.rank AS rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?{}
            ORDER BY chunks_fts.rank
            LIMIT ?
            "#,
            clause
        );

        let mut q = sqlx::query(&sql).bind(expression);
        for name in names.iter().chain(names.iter()) {
            q = q.bind(name);
        }
        let rows = q.bind(limit as i64).fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                candidate_from_row(row, -rank)
            })
            .collect())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        field: VectorField,
        limit: usize,
        filter: &DocFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let column = match field {
            VectorField::Narrative => "vector",
            VectorField::Contextual => "context_vector",
        };
        let (clause, names) = filter_clause(filter);
        let sql = format!(
            r#"
            SELECT c.id AS chunk_id, c.file_name, c.doc_name, c.page, c.text,
                   cv.{col} AS embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.{col} IS NOT NULL{clause}
            "#,
            col = column,
            clause = clause
        );

        let mut q = sqlx::query(&sql);
        for name in names.iter().chain(names.iter()) {
            q = q.bind(name);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut candidates: Vec<ChunkCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                candidate_from_row(row, similarity)
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);

        Ok(candidates)
    }
}

#[async_trait]
impl DocumentCatalog for SqliteStore {
    async fn list_documents(&self) -> Result<Vec<Document>> {
        Store::list_documents(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use docent_core::models::{DocumentMetadata, SubChunk};

    async fn open() -> (SqliteStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&tmp.path().join("data/docent.sqlite"))
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        (SqliteStore::new(pool), tmp)
    }

    fn doc(file_name: &str, name: &str) -> Document {
        Document::from_metadata(
            file_name,
            DocumentMetadata {
                name: name.to_string(),
                doc_type: "service_manual".to_string(),
                description: "desc".to_string(),
                manufacturer: "Acme".to_string(),
                model: "HX-200".to_string(),
            },
        )
    }

    fn chunk(d: &Document, index: i64, h1: &str, text: &str) -> Chunk {
        Chunk::new(
            d,
            index,
            SubChunk {
                h1: h1.to_string(),
                h2: String::new(),
                h3: String::new(),
                page: index as u32 + 1,
                text: text.to_string(),
            },
        )
    }

    #[test]
    fn test_match_expression_quotes_terms() {
        assert_eq!(
            match_expression("oil-filter?", &[KeywordField::Text, KeywordField::H1]).unwrap(),
            "{text h1} : (\"oil\" OR \"filter\")"
        );
        assert!(match_expression("?!", &[]).is_none());
    }

    #[tokio::test]
    async fn test_upsert_and_list_documents() {
        let (store, _tmp) = open().await;
        store.upsert_document(&doc("b.pdf", "Beta")).await.unwrap();
        store.upsert_document(&doc("a.pdf", "Alpha")).await.unwrap();
        store.upsert_document(&doc("a.pdf", "Alpha v2")).await.unwrap();

        let docs = Store::list_documents(&store).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].file_name, "a.pdf");
        assert_eq!(docs[0].doc_name, "Alpha v2");
        assert!(store.get_document("c.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_chunks_replaces_previous_set() {
        let (store, _tmp) = open().await;
        let d = doc("a.pdf", "Alpha");
        store.upsert_document(&d).await.unwrap();
        let first = vec![
            chunk(&d, 0, "Intro", "hello"),
            chunk(&d, 1, "Safety", "wear gloves"),
        ];
        store.replace_chunks("a.pdf", &first, &[]).await.unwrap();
        assert_eq!(store.chunk_count("a.pdf").await.unwrap(), 2);

        let second = vec![chunk(&d, 0, "Intro", "replaced")];
        store.replace_chunks("a.pdf", &second, &[]).await.unwrap();
        assert_eq!(store.chunk_count("a.pdf").await.unwrap(), 1);

        let hits = store
            .keyword_search("gloves", &[], 10, &DocFilter::All)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_keyword_search_respects_fields_and_filter() {
        let (store, _tmp) = open().await;
        let a = doc("a.pdf", "Alpha");
        let b = doc("b.pdf", "Beta");
        store.upsert_document(&a).await.unwrap();
        store.upsert_document(&b).await.unwrap();
        store
            .replace_chunks("a.pdf", &[chunk(&a, 0, "Torque", "tighten the bolts")], &[])
            .await
            .unwrap();
        store
            .replace_chunks("b.pdf", &[chunk(&b, 0, "Intro", "torque values")], &[])
            .await
            .unwrap();

        let all = store
            .keyword_search("torque", &[], 10, &DocFilter::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let headings_only = store
            .keyword_search("torque", &[KeywordField::H1], 10, &DocFilter::All)
            .await
            .unwrap();
        assert_eq!(headings_only.len(), 1);
        assert_eq!(headings_only[0].file_name, "a.pdf");

        let only_beta = store
            .keyword_search(
                "torque",
                &[],
                10,
                &DocFilter::Only(vec!["Beta".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(only_beta.len(), 1);
        assert_eq!(only_beta[0].doc_name, "Beta");
        assert_eq!(only_beta[0].page, 1);

        let none = store
            .keyword_search("torque", &[], 10, &DocFilter::Only(vec![]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let (store, _tmp) = open().await;
        let d = doc("a.pdf", "Alpha");
        store.upsert_document(&d).await.unwrap();
        let chunks = vec![
            chunk(&d, 0, "X", "x axis"),
            chunk(&d, 1, "Y", "y axis"),
            chunk(&d, 2, "Z", "no vector"),
        ];
        let vectors = vec![
            ChunkVectors {
                vector: Some(vec![1.0, 0.0]),
                context_vector: Some(vec![0.0, 1.0]),
            },
            ChunkVectors {
                vector: Some(vec![0.0, 1.0]),
                context_vector: None,
            },
            ChunkVectors::default(),
        ];
        store.replace_chunks("a.pdf", &chunks, &vectors).await.unwrap();

        let narrative = store
            .vector_search(&[0.1, 1.0], VectorField::Narrative, 10, &DocFilter::All)
            .await
            .unwrap();
        assert_eq!(narrative.len(), 2);
        assert_eq!(narrative[0].text, "y axis");

        let contextual = store
            .vector_search(&[0.1, 1.0], VectorField::Contextual, 10, &DocFilter::All)
            .await
            .unwrap();
        assert_eq!(contextual.len(), 1);
        assert_eq!(contextual[0].text, "x axis");

        let filtered = store
            .vector_search(
                &[1.0, 0.0],
                VectorField::Narrative,
                10,
                &DocFilter::Only(vec!["other.pdf".to_string()]),
            )
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_vectors_rejected() {
        let (store, _tmp) = open().await;
        let d = doc("a.pdf", "Alpha");
        store.upsert_document(&d).await.unwrap();
        let err = store
            .replace_chunks(
                "a.pdf",
                &[chunk(&d, 0, "X", "x")],
                &[ChunkVectors::default(), ChunkVectors::default()],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("vector sets"));
    }
}
