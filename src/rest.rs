//! Store backed by a hosted PostgREST endpoint (`{base}/rest/v1/{table}`).
//!
//! Rows travel as JSON in the same shape the models serialize to, so the
//! endpoint must expose the schema from `migrations/0001_training.sql`
//! (`percent`, `sections`, `is_correct`, ...), not an older hosted layout.
//! Upserts use `on_conflict=user_id,module_id` with
//! `Prefer: resolution=merge-duplicates`.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::models::{Certificate, Module, Progress, Quiz};
use crate::store::{Store, StoreError};

const MODULES: &str = "training_modules";
const QUIZZES: &str = "quizzes";
const PROGRESS: &str = "user_progress";
const CERTIFICATES: &str = "certificates";

// PostgREST filter values: keep the characters it treats literally
const FILTER_VALUE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

pub struct RestStore {
    http: Client,
    base: String,
    key: String,
}

impl RestStore {
    pub fn new(base: impl Into<String>, key: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            http: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            key: key.into(),
        }
    }

    fn request(&self, method: Method, table: &str, query: &Query) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}{}", self.base, table, query.render());
        self.http
            .request(method, url)
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: Query) -> Result<Vec<T>, StoreError> {
        let resp = self.request(Method::GET, table, &query.select_all()).send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn select_one<T: DeserializeOwned>(&self, table: &str, query: Query) -> Result<Option<T>, StoreError> {
        Ok(self.select(table, query).await?.into_iter().next())
    }

    async fn write<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        table: &str,
        query: Query,
        prefer: &str,
        body: Option<&B>,
    ) -> Result<Vec<T>, StoreError> {
        let mut req = self
            .request(method, table, &query)
            .header("Prefer", prefer);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn insert<T: Serialize + DeserializeOwned>(&self, table: &str, row: &T) -> Result<T, StoreError> {
        first(self.write(Method::POST, table, Query::new(), "return=representation", Some(row)).await?)
    }

    async fn upsert<T: Serialize + DeserializeOwned>(&self, table: &str, on_conflict: &str, row: &T) -> Result<T, StoreError> {
        first(
            self.write(
                Method::POST,
                table,
                Query::new().raw("on_conflict", on_conflict),
                "resolution=merge-duplicates,return=representation",
                Some(row),
            )
            .await?,
        )
    }

    async fn update<T: Serialize + DeserializeOwned>(&self, table: &str, id: Uuid, row: &T) -> Result<Option<T>, StoreError> {
        let rows = self
            .write(Method::PATCH, table, Query::new().eq("id", id), "return=representation", Some(row))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn delete(&self, table: &str, id: Uuid) -> Result<bool, StoreError> {
        let rows: Vec<serde_json::Value> = self
            .write::<(), _>(Method::DELETE, table, Query::new().eq("id", id), "return=representation", None)
            .await?;
        Ok(!rows.is_empty())
    }
}

async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::CONFLICT {
        return Err(StoreError::Conflict(body));
    }
    Err(StoreError::Backend { status: status.as_u16(), body })
}

fn first<T>(rows: Vec<T>) -> Result<T, StoreError> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StoreError::Decode("backend returned no representation".into()))
}

/// PostgREST query string: equality filters, ordering and raw parameters.
#[derive(Default, Debug, Clone)]
struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    fn new() -> Self {
        Self::default()
    }

    fn eq(mut self, column: &str, value: impl ToString) -> Self {
        let v = utf8_percent_encode(&value.to_string(), FILTER_VALUE).to_string();
        self.params.push((column.to_string(), format!("eq.{v}")));
        self
    }

    fn order(mut self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.params.push(("order".into(), format!("{column}.{dir}")));
        self
    }

    fn raw(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    fn select_all(mut self) -> Self {
        self.params.insert(0, ("select".into(), "*".into()));
        self
    }

    fn render(&self) -> String {
        if self.params.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("?{}", pairs.join("&"))
    }
}

#[async_trait]
impl Store for RestStore {
    async fn list_modules(&self) -> Result<Vec<Module>, StoreError> {
        self.select(MODULES, Query::new().order("created_at", true)).await
    }

    async fn get_module(&self, id: Uuid) -> Result<Option<Module>, StoreError> {
        self.select_one(MODULES, Query::new().eq("id", id)).await
    }

    async fn insert_module(&self, module: &Module) -> Result<Module, StoreError> {
        self.insert(MODULES, module).await
    }

    async fn update_module(&self, module: &Module) -> Result<Option<Module>, StoreError> {
        self.update(MODULES, module.id, module).await
    }

    async fn delete_module(&self, id: Uuid) -> Result<bool, StoreError> {
        self.delete(MODULES, id).await
    }

    async fn list_quizzes(&self) -> Result<Vec<Quiz>, StoreError> {
        self.select(QUIZZES, Query::new().order("created_at", true)).await
    }

    async fn get_quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError> {
        self.select_one(QUIZZES, Query::new().eq("id", id)).await
    }

    async fn quiz_for_module(&self, module_id: Uuid) -> Result<Option<Quiz>, StoreError> {
        self.select_one(QUIZZES, Query::new().eq("module_id", module_id)).await
    }

    async fn insert_quiz(&self, quiz: &Quiz) -> Result<Quiz, StoreError> {
        self.insert(QUIZZES, quiz).await
    }

    async fn update_quiz(&self, quiz: &Quiz) -> Result<Option<Quiz>, StoreError> {
        self.update(QUIZZES, quiz.id, quiz).await
    }

    async fn delete_quiz(&self, id: Uuid) -> Result<bool, StoreError> {
        self.delete(QUIZZES, id).await
    }

    async fn get_progress(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Progress>, StoreError> {
        self.select_one(PROGRESS, Query::new().eq("user_id", user_id).eq("module_id", module_id))
            .await
    }

    async fn list_progress(&self, user_id: Uuid) -> Result<Vec<Progress>, StoreError> {
        self.select(PROGRESS, Query::new().eq("user_id", user_id)).await
    }

    async fn upsert_progress(&self, progress: &Progress) -> Result<Progress, StoreError> {
        self.upsert(PROGRESS, "user_id,module_id", progress).await
    }

    async fn get_certificate(&self, user_id: Uuid, module_id: Uuid) -> Result<Option<Certificate>, StoreError> {
        self.select_one(CERTIFICATES, Query::new().eq("user_id", user_id).eq("module_id", module_id))
            .await
    }

    async fn list_certificates(&self, user_id: Uuid) -> Result<Vec<Certificate>, StoreError> {
        self.select(
            CERTIFICATES,
            Query::new().eq("user_id", user_id).order("issue_date", false),
        )
        .await
    }

    async fn upsert_certificate(&self, cert: &Certificate) -> Result<Certificate, StoreError> {
        self.upsert(CERTIFICATES, "user_id,module_id", cert).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_equality_filters_and_order() {
        let id = Uuid::nil();
        let q = Query::new()
            .eq("user_id", id)
            .order("issue_date", false)
            .select_all();
        assert_eq!(
            q.render(),
            "?select=*&user_id=eq.00000000-0000-0000-0000-000000000000&order=issue_date.desc"
        );
    }

    #[test]
    fn escapes_reserved_characters_in_filter_values() {
        let q = Query::new().eq("title", "a,b&c d");
        assert_eq!(q.render(), "?title=eq.a%2Cb%26c%20d");
    }

    #[test]
    fn empty_query_renders_nothing() {
        assert_eq!(Query::new().render(), "");
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let s = RestStore::new("https://backend.example/", "anon");
        assert_eq!(s.base, "https://backend.example");
    }
}
