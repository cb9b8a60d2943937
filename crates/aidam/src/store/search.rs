//! Domain helpers over the knowledge tables.
//!
//! The knowledge schema itself is opaque to the sidecar; these helpers are
//! the generic CRUD/search surface the memory MCP server exposes. Full-text
//! search runs against the per-table `search_vector` column, ranked by
//! `ts_rank` against `plainto_tsquery`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::Store;
use crate::Result;

/// A learning row, as returned by search and recency queries.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Learning {
    pub id: i64,
    pub project_slug: Option<String>,
    pub category: Option<String>,
    pub title: String,
    pub content: String,
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// A reusable pattern row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Pattern {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub example: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An error-and-solution row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ErrorSolution {
    pub id: i64,
    pub error_signature: String,
    pub error_message: Option<String>,
    pub solution: String,
    pub created_at: DateTime<Utc>,
}

/// A knowledge-index entry (topic summary with a drill-down reference).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub domain: String,
    pub topic: String,
    pub summary: Option<String>,
    pub detail_ref: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A drill-down detail section.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct KnowledgeDetail {
    pub id: i64,
    pub index_id: i64,
    pub section: Option<String>,
    pub content: String,
}

/// A project row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user-preference row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Preference {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Row counts across the memory tables, for `memory_get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub learnings: i64,
    pub patterns: i64,
    pub errors_solutions: i64,
    pub knowledge_index: i64,
    pub generated_tools: i64,
    pub session_states: i64,
}

impl Store {
    /// Insert a learning, returning its id.
    pub async fn add_learning(
        &self,
        project_slug: Option<&str>,
        category: Option<&str>,
        title: &str,
        content: &str,
        tags: &[String],
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO learnings (project_slug, category, title, content, tags)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(project_slug)
        .bind(category)
        .bind(title)
        .bind(content)
        .bind(tags)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    /// Full-text search over learnings, best matches first.
    pub async fn search_learnings(&self, query: &str, limit: i64) -> Result<Vec<Learning>> {
        let rows = sqlx::query_as::<_, Learning>(
            r#"
            SELECT id, project_slug, category, title, content, tags, created_at
            FROM learnings
            WHERE search_vector @@ plainto_tsquery('english', $1)
            ORDER BY ts_rank(search_vector, plainto_tsquery('english', $1)) DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Full-text search over patterns.
    pub async fn search_patterns(&self, query: &str, limit: i64) -> Result<Vec<Pattern>> {
        let rows = sqlx::query_as::<_, Pattern>(
            r#"
            SELECT id, name, description, example, created_at
            FROM patterns
            WHERE search_vector @@ plainto_tsquery('english', $1)
            ORDER BY ts_rank(search_vector, plainto_tsquery('english', $1)) DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Full-text search over recorded errors and their solutions.
    pub async fn search_errors(&self, query: &str, limit: i64) -> Result<Vec<ErrorSolution>> {
        let rows = sqlx::query_as::<_, ErrorSolution>(
            r#"
            SELECT id, error_signature, error_message, solution, created_at
            FROM errors_solutions
            WHERE search_vector @@ plainto_tsquery('english', $1)
            ORDER BY ts_rank(search_vector, plainto_tsquery('english', $1)) DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Most recent learnings regardless of relevance.
    pub async fn recent_learnings(&self, limit: i64) -> Result<Vec<Learning>> {
        let rows = sqlx::query_as::<_, Learning>(
            r#"
            SELECT id, project_slug, category, title, content, tags, created_at
            FROM learnings
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Row counts for the usage/stats tools.
    pub async fn memory_stats(&self) -> Result<MemoryStats> {
        let (learnings, patterns, errors_solutions, knowledge_index, generated_tools, session_states): (i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT count(*) FROM learnings),
                (SELECT count(*) FROM patterns),
                (SELECT count(*) FROM errors_solutions),
                (SELECT count(*) FROM knowledge_index),
                (SELECT count(*) FROM generated_tools WHERE is_active),
                (SELECT count(*) FROM session_state)
            "#,
        )
        .fetch_one(self.pool())
        .await?;
        Ok(MemoryStats {
            learnings,
            patterns,
            errors_solutions,
            knowledge_index,
            generated_tools,
            session_states,
        })
    }

    /// All known projects, newest first.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, Project>(
            "SELECT id, slug, name, description, created_at FROM projects ORDER BY created_at DESC",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// One project by slug.
    pub async fn get_project(&self, slug: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>(
            "SELECT id, slug, name, description, created_at FROM projects WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(self.pool())
        .await?;
        Ok(row)
    }

    /// Every stored user preference.
    pub async fn preferences(&self) -> Result<Vec<Preference>> {
        let rows = sqlx::query_as::<_, Preference>(
            "SELECT key, value, updated_at FROM user_preferences ORDER BY key",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Upsert one user preference by key.
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Upsert a knowledge-index entry by `(domain, topic)`.
    pub async fn upsert_knowledge_index(
        &self,
        domain: &str,
        topic: &str,
        summary: &str,
        detail_ref: Option<&str>,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO knowledge_index (domain, topic, summary, detail_ref, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (domain, topic) DO UPDATE
            SET summary = EXCLUDED.summary,
                detail_ref = EXCLUDED.detail_ref,
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(domain)
        .bind(topic)
        .bind(summary)
        .bind(detail_ref)
        .fetch_one(self.pool())
        .await?;
        Ok(id)
    }

    /// All index entries for a domain, newest first.
    pub async fn knowledge_index_list(&self, domain: &str) -> Result<Vec<KnowledgeEntry>> {
        let rows = sqlx::query_as::<_, KnowledgeEntry>(
            r#"
            SELECT id, domain, topic, summary, detail_ref, updated_at
            FROM knowledge_index
            WHERE domain = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(domain)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Drill-down sections under one index entry.
    pub async fn knowledge_details(&self, index_id: i64) -> Result<Vec<KnowledgeDetail>> {
        let rows = sqlx::query_as::<_, KnowledgeDetail>(
            r#"
            SELECT id, index_id, section, content
            FROM knowledge_details
            WHERE index_id = $1
            ORDER BY id
            "#,
        )
        .bind(index_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Full-text search across drill-down content.
    pub async fn search_knowledge_details(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<KnowledgeDetail>> {
        let rows = sqlx::query_as::<_, KnowledgeDetail>(
            r#"
            SELECT id, index_id, section, content
            FROM knowledge_details
            WHERE search_vector @@ plainto_tsquery('english', $1)
            ORDER BY ts_rank(search_vector, plainto_tsquery('english', $1)) DESC
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
