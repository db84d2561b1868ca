//! Notion 任务存储
//!
//! 两层查询 API：
//! - 新版：先 GET /v1/databases/{id} 发现 data source id（进程内缓存一次），再 POST /v1/data_sources/{ds}/query
//! - 旧版：POST /v1/databases/{id}/query
//!
//! 发现失败或新版端点返回 400/404 时透明回退到旧版路径。

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::config::NotionSection;
use crate::store::task::{
    Category, CreatedTask, NewTask, Priority, Task, TaskFilter, TaskStatus,
};
use crate::store::traits::{StoreError, TaskStore};

/// 数据库属性名
const PROP_TITLE: &str = "Name";
const PROP_SUMMARY: &str = "Summary";
const PROP_CATEGORY: &str = "Category";
const PROP_PRIORITY: &str = "Priority";
const PROP_DUE: &str = "Due";
const PROP_STATUS: &str = "Status";
const PROP_ASSIGNEE: &str = "Assignee";
const PROP_SIGNATURE: &str = "Signature";
const PROP_THREAD: &str = "Thread";

/// 单次查询最多翻页数
const MAX_QUERY_PAGES: usize = 10;
/// rich_text 单段最大长度（Notion 限制 2000）
const MAX_RICH_TEXT: usize = 2000;

/// Notion 存储：持有 HTTP 客户端与数据库 id，data source id 首次查询时发现并缓存
pub struct NotionStore {
    client: reqwest::Client,
    token: String,
    database_id: String,
    base_url: String,
    api_version: String,
    legacy_api_version: String,
    /// 只缓存成功的发现结果；None 表示该库没有 data source，始终走旧版
    data_source_id: OnceCell<Option<String>>,
}

impl NotionStore {
    pub fn new(cfg: &NotionSection, token: String, database_id: String) -> Result<Self, StoreError> {
        if token.is_empty() || database_id.is_empty() {
            return Err(StoreError::Config(
                "Notion token and database id are required".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            token,
            database_id,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
            legacy_api_version: cfg.legacy_api_version.clone(),
            data_source_id: OnceCell::new(),
        })
    }

    /// 预置 data source id（跳过发现）
    pub fn with_data_source_id(self, id: Option<String>) -> Self {
        let _ = self.data_source_id.set(id);
        self
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        version: &str,
        body: Option<&Value>,
    ) -> Result<Value, StoreError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .bearer_auth(&self.token)
            .header("Notion-Version", version);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// 发现并缓存 data source id；请求失败时本次走旧版，下次查询重新发现
    async fn data_source(&self) -> Option<String> {
        let discovered = self
            .data_source_id
            .get_or_try_init(|| async {
                let path = format!("/v1/databases/{}", self.database_id);
                let v = self.request(Method::GET, &path, &self.api_version, None).await?;
                let id = v["data_sources"]
                    .as_array()
                    .and_then(|a| a.first())
                    .and_then(|d| d["id"].as_str())
                    .map(String::from);
                match &id {
                    Some(ds) => tracing::info!("Notion data source discovered: {}", ds),
                    None => tracing::warn!(
                        "Notion database has no data_sources, using legacy query path"
                    ),
                }
                Ok::<_, StoreError>(id)
            })
            .await;
        match discovered {
            Ok(id) => id.clone(),
            Err(e) => {
                tracing::warn!(
                    "Notion data source discovery failed ({}), using legacy query path for now",
                    e
                );
                None
            }
        }
    }

    /// 查询页面：优先新版路径，400/404 时回退旧版；自动翻页
    async fn query_pages(&self, filter: Option<Value>) -> Result<Vec<Value>, StoreError> {
        if let Some(ds) = self.data_source().await {
            let path = format!("/v1/data_sources/{}/query", ds);
            match self.paginate(&path, &self.api_version, filter.clone()).await {
                Ok(pages) => return Ok(pages),
                Err(StoreError::Api { status, body })
                    if status == StatusCode::NOT_FOUND.as_u16()
                        || status == StatusCode::BAD_REQUEST.as_u16() =>
                {
                    tracing::warn!(
                        "Notion data source query failed ({}): {}, falling back to database query",
                        status,
                        body
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let path = format!("/v1/databases/{}/query", self.database_id);
        self.paginate(&path, &self.legacy_api_version, filter).await
    }

    async fn paginate(
        &self,
        path: &str,
        version: &str,
        filter: Option<Value>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_QUERY_PAGES {
            let mut body = json!({ "page_size": 100 });
            if let Some(f) = &filter {
                body["filter"] = f.clone();
            }
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }
            let resp = self.request(Method::POST, path, version, Some(&body)).await?;
            if let Some(results) = resp["results"].as_array() {
                pages.extend(results.iter().cloned());
            }
            cursor = match (resp["has_more"].as_bool(), resp["next_cursor"].as_str()) {
                (Some(true), Some(c)) => Some(c.to_string()),
                _ => None,
            };
            if cursor.is_none() {
                break;
            }
        }
        Ok(pages)
    }

    async fn patch_page(&self, id: &str, body: Value) -> Result<(), StoreError> {
        let path = format!("/v1/pages/{}", id);
        self.request(Method::PATCH, &path, &self.api_version, Some(&body))
            .await
            .map(|_| ())
    }
}

fn rich_text(text: &str) -> Value {
    let clipped: String = text.chars().take(MAX_RICH_TEXT).collect();
    json!([{ "type": "text", "text": { "content": clipped } }])
}

/// NewTask -> Notion properties
fn to_properties(task: &NewTask) -> Value {
    let mut props = json!({
        PROP_TITLE: { "title": rich_text(&task.title) },
        PROP_SUMMARY: { "rich_text": rich_text(&task.summary) },
        PROP_CATEGORY: { "select": { "name": task.category.as_str() } },
        PROP_PRIORITY: { "select": { "name": task.priority.as_str() } },
        PROP_STATUS: { "status": { "name": TaskStatus::Todo.as_str() } },
    });
    if let Some(due) = task.due_date {
        props[PROP_DUE] = json!({ "date": { "start": due.to_string() } });
    }
    if let Some(a) = &task.assignee {
        props[PROP_ASSIGNEE] = json!({ "rich_text": rich_text(a) });
    }
    if let Some(s) = &task.context_signature {
        props[PROP_SIGNATURE] = json!({ "rich_text": rich_text(s) });
    }
    if let Some(k) = &task.thread_key {
        props[PROP_THREAD] = json!({ "rich_text": rich_text(k) });
    }
    props
}

/// TaskFilter -> Notion filter（多个条件用 and 组合）
fn to_filter(filter: &TaskFilter) -> Option<Value> {
    let mut clauses = Vec::new();
    if filter.open_only {
        clauses.push(json!({
            "property": PROP_STATUS,
            "status": { "does_not_equal": TaskStatus::Done.as_str() }
        }));
    }
    if let Some(d) = filter.due_on_or_before {
        clauses.push(json!({
            "property": PROP_DUE,
            "date": { "on_or_before": d.to_string() }
        }));
    }
    if let Some(p) = filter.priority {
        clauses.push(json!({
            "property": PROP_PRIORITY,
            "select": { "equals": p.as_str() }
        }));
    }
    if let Some(term) = &filter.text {
        clauses.push(json!({
            "or": [
                { "property": PROP_TITLE, "title": { "contains": term } },
                { "property": PROP_ASSIGNEE, "rich_text": { "contains": term } }
            ]
        }));
    }
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "and": clauses })),
    }
}

fn plain_text(prop: &Value) -> String {
    let parts = prop["title"]
        .as_array()
        .or_else(|| prop["rich_text"].as_array());
    parts
        .map(|arr| {
            arr.iter()
                .filter_map(|p| p["plain_text"].as_str().or_else(|| p["text"]["content"].as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn select_name(prop: &Value) -> Option<&str> {
    prop["select"]["name"]
        .as_str()
        .or_else(|| prop["status"]["name"].as_str())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Notion page -> Task
fn page_to_task(page: &Value) -> Option<Task> {
    let id = page["id"].as_str()?.to_string();
    let props = &page["properties"];
    Some(Task {
        id,
        title: plain_text(&props[PROP_TITLE]),
        summary: plain_text(&props[PROP_SUMMARY]),
        category: select_name(&props[PROP_CATEGORY])
            .and_then(Category::parse_loose)
            .unwrap_or_default(),
        priority: select_name(&props[PROP_PRIORITY])
            .and_then(Priority::parse_loose)
            .unwrap_or_default(),
        due_date: props[PROP_DUE]["date"]["start"]
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d").ok()),
        status: select_name(&props[PROP_STATUS])
            .and_then(TaskStatus::parse_loose)
            .unwrap_or_default(),
        assignee: non_empty(plain_text(&props[PROP_ASSIGNEE])),
        context_signature: non_empty(plain_text(&props[PROP_SIGNATURE])),
        thread_key: non_empty(plain_text(&props[PROP_THREAD])),
        url: page["url"].as_str().map(String::from),
    })
}

#[async_trait]
impl TaskStore for NotionStore {
    async fn create(&self, task: &NewTask) -> Result<CreatedTask, StoreError> {
        let parent = match self.data_source().await {
            Some(ds) => json!({ "type": "data_source_id", "data_source_id": ds }),
            None => json!({ "database_id": self.database_id }),
        };
        let body = json!({ "parent": parent, "properties": to_properties(task) });
        let resp = self
            .request(Method::POST, "/v1/pages", &self.api_version, Some(&body))
            .await?;
        let id = resp["id"]
            .as_str()
            .ok_or_else(|| StoreError::Decode("page id missing".to_string()))?
            .to_string();
        let url = resp["url"].as_str().unwrap_or_default().to_string();
        tracing::info!("Notion page created: {}", id);
        Ok(CreatedTask { id, url })
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let pages = self.query_pages(to_filter(filter)).await?;
        Ok(pages.iter().filter_map(page_to_task).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let path = format!("/v1/pages/{}", id);
        match self.request(Method::GET, &path, &self.api_version, None).await {
            Ok(page) => {
                if page["archived"].as_bool() == Some(true) || page["in_trash"].as_bool() == Some(true) {
                    return Ok(None);
                }
                Ok(page_to_task(&page))
            }
            Err(StoreError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn find_by_thread_key(&self, key: &str) -> Result<Option<Task>, StoreError> {
        let filter = json!({ "property": PROP_THREAD, "rich_text": { "equals": key } });
        let pages = self.query_pages(Some(filter)).await?;
        Ok(pages.iter().find_map(page_to_task))
    }

    async fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        self.patch_page(
            id,
            json!({ "properties": { PROP_STATUS: { "status": { "name": status.as_str() } } } }),
        )
        .await
    }

    async fn append_note(&self, id: &str, note: &str) -> Result<(), StoreError> {
        let path = format!("/v1/blocks/{}/children", id);
        let body = json!({
            "children": [{
                "object": "block",
                "type": "paragraph",
                "paragraph": { "rich_text": rich_text(note) }
            }]
        });
        self.request(Method::PATCH, &path, &self.api_version, Some(&body))
            .await
            .map(|_| ())
    }

    async fn update_due_date(&self, id: &str, date: NaiveDate) -> Result<(), StoreError> {
        self.patch_page(
            id,
            json!({ "properties": { PROP_DUE: { "date": { "start": date.to_string() } } } }),
        )
        .await
    }

    async fn update_signature(&self, id: &str, signature: &str) -> Result<(), StoreError> {
        self.patch_page(
            id,
            json!({ "properties": { PROP_SIGNATURE: { "rich_text": rich_text(signature) } } }),
        )
        .await
    }

    async fn archive(&self, id: &str) -> Result<(), StoreError> {
        self.patch_page(id, json!({ "archived": true })).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_composition() {
        assert!(to_filter(&TaskFilter::default()).is_none());
        let single = to_filter(&TaskFilter::open()).unwrap();
        assert_eq!(single["property"], PROP_STATUS);

        let mut f = TaskFilter::text("View");
        f.open_only = true;
        let combined = to_filter(&f).unwrap();
        assert_eq!(combined["and"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_page_to_task_reads_properties() {
        let page = json!({
            "id": "page-1",
            "url": "https://www.notion.so/page-1",
            "properties": {
                "Name": { "title": [{ "plain_text": "Fix View bug" }] },
                "Summary": { "rich_text": [{ "plain_text": "Crash on load" }] },
                "Category": { "select": { "name": "Work" } },
                "Priority": { "select": { "name": "P1" } },
                "Due": { "date": { "start": "2025-01-11" } },
                "Status": { "status": { "name": "In Progress" } },
                "Assignee": { "rich_text": [] },
                "Thread": { "rich_text": [{ "plain_text": "1700.01" }] }
            }
        });
        let task = page_to_task(&page).unwrap();
        assert_eq!(task.title, "Fix View bug");
        assert_eq!(task.priority, Priority::P1);
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.due_date, NaiveDate::from_ymd_opt(2025, 1, 11));
        assert_eq!(task.assignee, None);
        assert_eq!(task.thread_key.as_deref(), Some("1700.01"));
    }

    #[test]
    fn test_properties_skip_missing_optionals() {
        let props = to_properties(&NewTask::new("Buy milk"));
        assert!(props.get(PROP_DUE).is_none());
        assert!(props.get(PROP_THREAD).is_none());
        assert_eq!(props[PROP_STATUS]["status"]["name"], "Todo");
    }

    #[cfg(feature = "slack")]
    #[tokio::test]
    async fn test_query_falls_back_and_caches_only_successful_discovery() {
        use axum::extract::State;
        use axum::http::StatusCode as HttpStatus;
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        #[derive(Default)]
        struct Hits {
            discovery: AtomicUsize,
            data_source: AtomicUsize,
            database: AtomicUsize,
        }

        let hits = Arc::new(Hits::default());
        let app = Router::new()
            .route(
                "/v1/databases/:id",
                get(|State(h): State<Arc<Hits>>| async move {
                    // 第一次发现失败（暂时性错误），之后成功
                    if h.discovery.fetch_add(1, Ordering::SeqCst) == 0 {
                        (HttpStatus::BAD_GATEWAY, Json(json!({ "message": "upstream" })))
                    } else {
                        (HttpStatus::OK, Json(json!({ "data_sources": [{ "id": "ds-1" }] })))
                    }
                }),
            )
            .route(
                "/v1/data_sources/:id/query",
                post(|State(h): State<Arc<Hits>>| async move {
                    h.data_source.fetch_add(1, Ordering::SeqCst);
                    (HttpStatus::NOT_FOUND, Json(json!({ "message": "not found" })))
                }),
            )
            .route(
                "/v1/databases/:id/query",
                post(|State(h): State<Arc<Hits>>| async move {
                    h.database.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "results": [{
                            "id": "page-1",
                            "properties": {
                                "Name": { "title": [{ "plain_text": "Fix View bug" }] },
                                "Status": { "status": { "name": "Todo" } }
                            }
                        }],
                        "has_more": false
                    }))
                }),
            )
            .with_state(hits.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let cfg = NotionSection {
            base_url: format!("http://{}", addr),
            timeout_secs: 5,
            ..Default::default()
        };
        let store = NotionStore::new(&cfg, "secret".into(), "db-1".into()).unwrap();

        for _ in 0..3 {
            let tasks = store.query(&TaskFilter::default()).await.unwrap();
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].title, "Fix View bug");
        }
        // 失败的发现没有被缓存：第二次查询重新发现，第三次直接用缓存
        assert_eq!(hits.discovery.load(Ordering::SeqCst), 2);
        assert_eq!(hits.data_source.load(Ordering::SeqCst), 2);
        assert_eq!(hits.database.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_new_requires_credentials() {
        let cfg = NotionSection::default();
        assert!(NotionStore::new(&cfg, String::new(), "db".into()).is_err());
    }
}
