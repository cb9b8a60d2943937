//! The memory server: CRUD/search over the knowledge tables plus the
//! restricted raw-SQL surface, exposed to the background agents.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::server::{render_paged, PageParams, ToolHandler, ToolSpec};
use crate::store::Store;
use crate::{AidamError, Result};

const DEFAULT_SEARCH_LIMIT: i64 = 10;

pub struct MemoryToolHandler {
    store: Store,
}

impl MemoryToolHandler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

fn query_schema(extra: &[(&str, &str, &str)]) -> Value {
    let mut properties = json!({
        "max_chars": {"type": "integer", "description": "Output cap in characters (default 4000, 0 = unlimited)"},
        "offset": {"type": "integer", "description": "Character offset into the rendered output"},
        "filter": {"type": "string", "description": "Case-insensitive substring filter over list results"},
    });
    for (name, kind, description) in extra {
        properties[*name] = json!({"type": kind, "description": description});
    }
    json!({"type": "object", "properties": properties})
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AidamError::validation(format!("missing required argument '{}'", name)))
}

fn limit_arg(args: &Value) -> i64 {
    args.get("limit")
        .and_then(Value::as_i64)
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
}

fn params_arg(args: &Value) -> Vec<Value> {
    args.get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

async fn run_scoped_migration<'a>(
    store: &'a Store,
    name: &'a str,
    allowed_tables: &'a [String],
    sql: &'a str,
) -> Result<()> {
    store
        .execute_scoped_migration(name, allowed_tables, sql)
        .await
}

#[async_trait]
impl ToolHandler for MemoryToolHandler {
    fn server_name(&self) -> &'static str {
        "memory"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "memory_search",
                "Full-text search over learnings, best matches first",
                query_schema(&[
                    ("q", "string", "Search query"),
                    ("limit", "integer", "Max rows (default 10)"),
                ]),
            ),
            ToolSpec::new(
                "memory_add_learning",
                "Record a new learning",
                json!({"type": "object", "properties": {
                    "project": {"type": "string"},
                    "category": {"type": "string"},
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                }, "required": ["title", "content"]}),
            ),
            ToolSpec::new(
                "memory_search_patterns",
                "Full-text search over reusable patterns",
                query_schema(&[
                    ("q", "string", "Search query"),
                    ("limit", "integer", "Max rows (default 10)"),
                ]),
            ),
            ToolSpec::new(
                "memory_search_errors",
                "Full-text search over recorded errors and solutions",
                query_schema(&[
                    ("q", "string", "Search query"),
                    ("limit", "integer", "Max rows (default 10)"),
                ]),
            ),
            ToolSpec::new(
                "memory_get_recent_learnings",
                "Most recent learnings",
                query_schema(&[("limit", "integer", "Max rows (default 10)")]),
            ),
            ToolSpec::new(
                "memory_get_stats",
                "Row counts across the memory tables",
                query_schema(&[]),
            ),
            ToolSpec::new(
                "memory_list_projects",
                "All known projects",
                query_schema(&[]),
            ),
            ToolSpec::new(
                "memory_get_project",
                "One project by slug",
                query_schema(&[("slug", "string", "Project slug")]),
            ),
            ToolSpec::new(
                "memory_get_preferences",
                "Every stored user preference",
                query_schema(&[]),
            ),
            ToolSpec::new(
                "memory_set_preference",
                "Set one user preference",
                json!({"type": "object", "properties": {
                    "key": {"type": "string"},
                    "value": {"type": "string"},
                }, "required": ["key", "value"]}),
            ),
            ToolSpec::new(
                "memory_drilldown_list",
                "Knowledge-index entries for a domain",
                query_schema(&[("domain", "string", "Knowledge domain")]),
            ),
            ToolSpec::new(
                "memory_drilldown_get",
                "Detail sections under one knowledge-index entry",
                query_schema(&[("index_id", "integer", "knowledge_index row id")]),
            ),
            ToolSpec::new(
                "memory_drilldown_search",
                "Full-text search across drill-down content",
                query_schema(&[
                    ("q", "string", "Search query"),
                    ("limit", "integer", "Max rows (default 10)"),
                ]),
            ),
            ToolSpec::new(
                "db_select",
                "Run a read-only SELECT (any other statement is rejected)",
                query_schema(&[
                    ("sql", "string", "SELECT statement with $1-style placeholders"),
                    ("params", "array", "Positional parameters"),
                ]),
            ),
            ToolSpec::new(
                "db_execute",
                "Run a single UPDATE/INSERT/DELETE statement",
                json!({"type": "object", "properties": {
                    "sql": {"type": "string"},
                    "params": {"type": "array"},
                }, "required": ["sql"]}),
            ),
            ToolSpec::new(
                "db_execute_migration_scoped",
                "Run DDL restricted to a declared table whitelist",
                json!({"type": "object", "properties": {
                    "name": {"type": "string", "description": "Migration label for the log"},
                    "allowed_tables": {"type": "array", "items": {"type": "string"}},
                    "sql": {"type": "string"},
                }, "required": ["name", "allowed_tables", "sql"]}),
            ),
            ToolSpec::new(
                "db_describe_schema",
                "Tables and columns of the memory database",
                query_schema(&[]),
            ),
        ]
    }

    async fn call(&self, name: &str, args: Value) -> Result<Value> {
        let page = PageParams::from_args(&args);
        let payload = match name {
            "memory_search" => {
                let rows = self
                    .store
                    .search_learnings(str_arg(&args, "q")?, limit_arg(&args))
                    .await?;
                serde_json::to_value(rows)?
            }
            "memory_add_learning" => {
                let tags: Vec<String> = args
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                let id = self
                    .store
                    .add_learning(
                        args.get("project").and_then(Value::as_str),
                        args.get("category").and_then(Value::as_str),
                        str_arg(&args, "title")?,
                        str_arg(&args, "content")?,
                        &tags,
                    )
                    .await?;
                json!({"id": id})
            }
            "memory_search_patterns" => {
                let rows = self
                    .store
                    .search_patterns(str_arg(&args, "q")?, limit_arg(&args))
                    .await?;
                serde_json::to_value(rows)?
            }
            "memory_search_errors" => {
                let rows = self
                    .store
                    .search_errors(str_arg(&args, "q")?, limit_arg(&args))
                    .await?;
                serde_json::to_value(rows)?
            }
            "memory_get_recent_learnings" => {
                serde_json::to_value(self.store.recent_learnings(limit_arg(&args)).await?)?
            }
            "memory_get_stats" => serde_json::to_value(self.store.memory_stats().await?)?,
            "memory_list_projects" => serde_json::to_value(self.store.list_projects().await?)?,
            "memory_get_project" => {
                let slug = str_arg(&args, "slug")?;
                match self.store.get_project(slug).await? {
                    Some(project) => serde_json::to_value(project)?,
                    None => AidamError::not_found(format!("project '{}'", slug)).to_envelope(),
                }
            }
            "memory_get_preferences" => serde_json::to_value(self.store.preferences().await?)?,
            "memory_set_preference" => {
                self.store
                    .set_preference(str_arg(&args, "key")?, str_arg(&args, "value")?)
                    .await?;
                json!({"saved": true})
            }
            "memory_drilldown_list" => serde_json::to_value(
                self.store
                    .knowledge_index_list(str_arg(&args, "domain")?)
                    .await?,
            )?,
            "memory_drilldown_get" => {
                let index_id = args
                    .get("index_id")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| AidamError::validation("missing required argument 'index_id'"))?;
                serde_json::to_value(self.store.knowledge_details(index_id).await?)?
            }
            "memory_drilldown_search" => serde_json::to_value(
                self.store
                    .search_knowledge_details(str_arg(&args, "q")?, limit_arg(&args))
                    .await?,
            )?,
            "db_select" => {
                let rows = self
                    .store
                    .select_query(str_arg(&args, "sql")?, &params_arg(&args))
                    .await?;
                Value::Array(rows)
            }
            "db_execute" => {
                let affected = self
                    .store
                    .execute_write(str_arg(&args, "sql")?, &params_arg(&args))
                    .await?;
                json!({"rows_affected": affected})
            }
            "db_execute_migration_scoped" => {
                let allowed: Vec<String> = args
                    .get("allowed_tables")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                run_scoped_migration(
                    &self.store,
                    str_arg(&args, "name")?,
                    &allowed,
                    str_arg(&args, "sql")?,
                )
                .await?;
                json!({"applied": true})
            }
            "db_describe_schema" => serde_json::to_value(self.store.describe_schema().await?)?,
            other => {
                return Err(AidamError::not_found(format!("tool '{}'", other)));
            }
        };

        Ok(render_paged(&payload, &page))
    }
}
