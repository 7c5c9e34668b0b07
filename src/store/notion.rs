use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use super::{ItemSource, StoreError};
use crate::config::{env_string, env_u64, ConfigError};
use crate::model::{ItemFilter, ItemPatch, ReviewItem, SourceId};

const DEFAULT_API_URL: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const QUERY_PAGE_SIZE: u32 = 100;

/// Scheduling properties the engine owns on every review database. The
/// title property is read schema-flexibly (whatever property carries the
/// `title` type), but writes address these names directly.
const PROP_TITLE: &str = "Word";
const PROP_REVIEW_COUNT: &str = "Review Count";
const PROP_NEXT_REVIEW: &str = "Next Review Date";
const PROP_LAST_REVIEWED: &str = "Last Reviewed Date";
const PROP_MASTERED: &str = "Mastered";
const PROP_DATE_ADDED: &str = "Date Added";
const PROP_CONFIG_VALUE: &str = "Value";

/// Rows whose title starts with this prefix hold engine configuration, not
/// review items.
const CONFIG_PREFIX: &str = "__CONFIG_";

fn config_title(key: &str) -> String {
    format!("{CONFIG_PREFIX}{key}__")
}

/// One Notion database acting as a review item source. Failures are mapped
/// onto [`StoreError`] by HTTP class: connection errors, timeouts, 408, 429
/// and 5xx are transient, everything else is permanent. Retry behavior is
/// layered on by [`super::retry::RetryingSource`].
pub struct NotionSource {
    id: SourceId,
    client: reqwest::Client,
    token: String,
    api_url: String,
    database_id: String,
}

impl NotionSource {
    pub fn new(
        client: reqwest::Client,
        token: String,
        api_url: String,
        database_id: String,
    ) -> Self {
        Self {
            id: SourceId::new(database_id.clone()),
            client,
            token,
            api_url: api_url.trim_end_matches('/').to_string(),
            database_id,
        }
    }

    /// Builds one source per configured database: the primary from
    /// `NOTION_DATABASE_ID` plus any listed in `ADDITIONAL_DATABASE_IDS`.
    pub fn from_env() -> Result<Vec<NotionSource>, ConfigError> {
        let token =
            env_string("NOTION_API_KEY").ok_or(ConfigError::MissingEnv("NOTION_API_KEY"))?;
        let primary =
            env_string("NOTION_DATABASE_ID").ok_or(ConfigError::MissingEnv("NOTION_DATABASE_ID"))?;
        let api_url = env_string("NOTION_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let timeout = Duration::from_millis(env_u64("NOTION_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS));

        let mut database_ids = vec![primary];
        if let Some(raw) = env_string("ADDITIONAL_DATABASE_IDS") {
            for id in raw.split(',') {
                let id = id.trim();
                if !id.is_empty() && !database_ids.iter().any(|existing| existing == id) {
                    database_ids.push(id.to_string());
                }
            }
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(database_ids
            .into_iter()
            .map(|database_id| {
                NotionSource::new(client.clone(), token.clone(), api_url.clone(), database_id)
            })
            .collect())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value, StoreError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| StoreError::Permanent(format!("invalid response body: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }

    async fn query_page(
        &self,
        filter: Option<&serde_json::Value>,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<serde_json::Value, StoreError> {
        let url = format!("{}/databases/{}/query", self.api_url, self.database_id);
        let mut body = serde_json::json!({ "page_size": page_size });
        if let Some(clause) = filter {
            body["filter"] = clause.clone();
        }
        if let Some(cursor) = cursor {
            body["start_cursor"] = serde_json::json!(cursor);
        }
        self.send(self.client.post(&url).json(&body)).await
    }

    async fn find_config_page(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        // The title property can always be addressed by its fixed id.
        let filter = serde_json::json!({
            "property": "title",
            "title": { "equals": config_title(key) }
        });
        let response = self.query_page(Some(&filter), None, 1).await?;
        Ok(response
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|r| r.first())
            .cloned())
    }

    fn parse_page(&self, page: &serde_json::Value) -> Option<ReviewItem> {
        let id = page.get("id")?.as_str()?.to_string();
        let props = page.get("properties")?;

        let date_added = prop_date(props, PROP_DATE_ADDED).or_else(|| created_date(page))?;

        Some(ReviewItem {
            id,
            source_id: self.id.clone(),
            label: page_title(page),
            review_count: prop_number(props, PROP_REVIEW_COUNT)
                .map(|n| n.max(0.0) as u32)
                .unwrap_or(0),
            next_review_date: prop_date(props, PROP_NEXT_REVIEW),
            last_reviewed_date: prop_date(props, PROP_LAST_REVIEWED),
            date_added,
            mastered: prop_checkbox(props, PROP_MASTERED).unwrap_or(false),
        })
    }
}

#[async_trait]
impl ItemSource for NotionSource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    async fn query_items(&self, filter: ItemFilter) -> Result<Vec<ReviewItem>, StoreError> {
        let filter_clause = build_filter(filter);
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let response = self
                .query_page(filter_clause.as_ref(), cursor.as_deref(), QUERY_PAGE_SIZE)
                .await?;

            for page in response
                .get("results")
                .and_then(|r| r.as_array())
                .into_iter()
                .flatten()
            {
                if is_config_page(page) {
                    continue;
                }
                match self.parse_page(page) {
                    Some(item) => items.push(item),
                    None => warn!(source = %self.id, "skipping malformed item record"),
                }
            }

            cursor = next_cursor(&response);
            if cursor.is_none() {
                break;
            }
        }

        Ok(items)
    }

    async fn fetch_item(&self, item_id: &str) -> Result<ReviewItem, StoreError> {
        let url = format!("{}/pages/{}", self.api_url, item_id);
        let page = match self.send(self.client.get(&url)).await {
            Ok(page) => page,
            Err(StoreError::NotFound(_)) => {
                return Err(StoreError::NotFound(item_id.to_string()))
            }
            Err(err) => return Err(err),
        };

        self.parse_page(&page)
            .ok_or_else(|| StoreError::Permanent(format!("malformed item record {item_id}")))
    }

    async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<(), StoreError> {
        let url = format!("{}/pages/{}", self.api_url, item_id);
        let body = serde_json::json!({
            "properties": {
                PROP_REVIEW_COUNT: { "number": patch.review_count },
                PROP_NEXT_REVIEW: { "date": { "start": patch.next_review_date.to_string() } },
                PROP_LAST_REVIEWED: { "date": { "start": patch.last_reviewed_date.to_string() } },
                PROP_MASTERED: { "checkbox": patch.mastered },
            }
        });

        match self.send(self.client.patch(&url).json(&body)).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(StoreError::NotFound(item_id.to_string())),
            Err(err) => Err(err),
        }
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        let mut count = 0u64;
        let mut cursor: Option<String> = None;

        loop {
            let response = self
                .query_page(None, cursor.as_deref(), QUERY_PAGE_SIZE)
                .await?;

            count += response
                .get("results")
                .and_then(|r| r.as_array())
                .map(|pages| pages.iter().filter(|p| !is_config_page(p)).count() as u64)
                .unwrap_or(0);

            cursor = next_cursor(&response);
            if cursor.is_none() {
                break;
            }
        }

        Ok(count)
    }

    async fn load_config(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let Some(page) = self.find_config_page(key).await? else {
            return Ok(None);
        };

        let Some(raw) = page
            .get("properties")
            .and_then(|props| props.get(PROP_CONFIG_VALUE))
            .and_then(|prop| prop.get("rich_text"))
            .map(join_rich_text)
            .filter(|text| !text.is_empty())
        else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(source = %self.id, key, error = %err, "persisted config is not valid JSON, ignoring");
                Ok(None)
            }
        }
    }

    async fn save_config(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(&value)
            .map_err(|e| StoreError::Permanent(format!("config value not serializable: {e}")))?;
        let value_prop = serde_json::json!({
            "rich_text": [ { "text": { "content": serialized } } ]
        });

        let existing = self
            .find_config_page(key)
            .await?
            .and_then(|page| page.get("id").and_then(|id| id.as_str()).map(String::from));

        match existing {
            Some(page_id) => {
                let url = format!("{}/pages/{}", self.api_url, page_id);
                let body = serde_json::json!({
                    "properties": { PROP_CONFIG_VALUE: value_prop }
                });
                self.send(self.client.patch(&url).json(&body)).await?;
            }
            None => {
                let url = format!("{}/pages", self.api_url);
                let body = serde_json::json!({
                    "parent": { "database_id": self.database_id },
                    "properties": {
                        PROP_TITLE: { "title": [ { "text": { "content": config_title(key) } } ] },
                        PROP_CONFIG_VALUE: value_prop,
                    }
                });
                self.send(self.client.post(&url).json(&body)).await?;
            }
        }

        Ok(())
    }

    async fn describe(&self) -> Result<String, StoreError> {
        let url = format!("{}/databases/{}", self.api_url, self.database_id);
        let db = self.send(self.client.get(&url)).await?;
        let title = db
            .get("title")
            .map(join_rich_text)
            .filter(|t| !t.is_empty());

        match title {
            Some(title) => Ok(format!("notion database '{title}'")),
            None => Ok(format!("notion database {}", self.database_id)),
        }
    }
}

/// Server-side filter for the scheduling properties. The config-row
/// exclusion happens client-side because it keys off the schema-flexible
/// title property.
fn build_filter(filter: ItemFilter) -> Option<serde_json::Value> {
    let mut clauses = Vec::new();

    if filter.due_or_new {
        clauses.push(serde_json::json!({
            "or": [
                { "property": PROP_NEXT_REVIEW, "date": { "is_empty": true } },
                { "property": PROP_NEXT_REVIEW, "date": { "on_or_before": filter.today.to_string() } },
            ]
        }));
    }

    if filter.exclude_mastered {
        clauses.push(serde_json::json!({
            "property": PROP_MASTERED,
            "checkbox": { "equals": false }
        }));
    }

    match clauses.len() {
        0 => None,
        1 => Some(clauses.remove(0)),
        _ => Some(serde_json::json!({ "and": clauses })),
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> StoreError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        StoreError::Transient(format!("HTTP {status}: {body}"))
    } else if status == reqwest::StatusCode::NOT_FOUND {
        StoreError::NotFound(format!("HTTP {status}: {body}"))
    } else {
        StoreError::Permanent(format!("HTTP {status}: {body}"))
    }
}

fn next_cursor(response: &serde_json::Value) -> Option<String> {
    if response
        .get("has_more")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        response
            .get("next_cursor")
            .and_then(|v| v.as_str())
            .map(String::from)
    } else {
        None
    }
}

/// Text of whichever property carries the `title` type. Property names vary
/// across user databases, so the type is what identifies it.
fn page_title(page: &serde_json::Value) -> Option<String> {
    let props = page.get("properties")?.as_object()?;
    for value in props.values() {
        if value.get("type").and_then(|t| t.as_str()) == Some("title") {
            let text = join_rich_text(value.get("title")?);
            return if text.is_empty() { None } else { Some(text) };
        }
    }
    None
}

fn is_config_page(page: &serde_json::Value) -> bool {
    page_title(page)
        .map(|title| title.starts_with(CONFIG_PREFIX))
        .unwrap_or(false)
}

fn join_rich_text(parts: &serde_json::Value) -> String {
    parts
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|p| p.get("plain_text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn prop_number(props: &serde_json::Value, name: &str) -> Option<f64> {
    props.get(name)?.get("number")?.as_f64()
}

fn prop_checkbox(props: &serde_json::Value, name: &str) -> Option<bool> {
    props.get(name)?.get("checkbox")?.as_bool()
}

fn prop_date(props: &serde_json::Value, name: &str) -> Option<NaiveDate> {
    let start = props.get(name)?.get("date")?.get("start")?.as_str()?;
    parse_date(start)
}

/// Notion date starts may carry a time component; only the day matters here.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn created_date(page: &serde_json::Value) -> Option<NaiveDate> {
    parse_date(page.get("created_time")?.as_str()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> NotionSource {
        NotionSource::new(
            reqwest::Client::new(),
            "secret".to_string(),
            DEFAULT_API_URL.to_string(),
            "db-1".to_string(),
        )
    }

    fn page_fixture() -> serde_json::Value {
        serde_json::json!({
            "id": "page-1",
            "created_time": "2026-01-05T09:30:00.000Z",
            "properties": {
                "Word": {
                    "type": "title",
                    "title": [ { "plain_text": "ephemeral" } ]
                },
                "Review Count": { "type": "number", "number": 3 },
                "Next Review Date": { "type": "date", "date": { "start": "2026-03-10" } },
                "Last Reviewed Date": { "type": "date", "date": { "start": "2026-03-02T08:00:00.000+00:00" } },
                "Date Added": { "type": "date", "date": { "start": "2026-01-05" } },
                "Mastered": { "type": "checkbox", "checkbox": false }
            }
        })
    }

    #[test]
    fn test_parse_page() {
        let item = source().parse_page(&page_fixture()).unwrap();
        assert_eq!(item.id, "page-1");
        assert_eq!(item.source_id.as_str(), "db-1");
        assert_eq!(item.label.as_deref(), Some("ephemeral"));
        assert_eq!(item.review_count, 3);
        assert_eq!(
            item.next_review_date,
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
        assert_eq!(
            item.last_reviewed_date,
            NaiveDate::from_ymd_opt(2026, 3, 2)
        );
        assert_eq!(item.date_added, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        assert!(!item.mastered);
    }

    #[test]
    fn test_parse_page_defaults() {
        let page = serde_json::json!({
            "id": "page-2",
            "created_time": "2026-02-01T00:00:00.000Z",
            "properties": {
                "Name": {
                    "type": "title",
                    "title": [ { "plain_text": "fresh" } ]
                },
                "Next Review Date": { "type": "date", "date": null },
                "Review Count": { "type": "number", "number": null }
            }
        });

        // title found under a different property name, date added falls
        // back to the page creation time
        let item = source().parse_page(&page).unwrap();
        assert_eq!(item.label.as_deref(), Some("fresh"));
        assert_eq!(item.review_count, 0);
        assert_eq!(item.next_review_date, None);
        assert_eq!(item.last_reviewed_date, None);
        assert_eq!(item.date_added, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
        assert!(!item.mastered);
    }

    #[test]
    fn test_parse_page_rejects_missing_id() {
        let page = serde_json::json!({ "properties": {} });
        assert!(source().parse_page(&page).is_none());
    }

    #[test]
    fn test_config_page_detection() {
        let page = serde_json::json!({
            "id": "cfg",
            "properties": {
                "Word": {
                    "type": "title",
                    "title": [ { "plain_text": "__CONFIG_review_schedule__" } ]
                }
            }
        });
        assert!(is_config_page(&page));
        assert!(!is_config_page(&page_fixture()));
    }

    #[test]
    fn test_build_filter_shapes() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();

        let due = build_filter(ItemFilter::due_or_new(today)).unwrap();
        let clauses = due["and"].as_array().unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(
            clauses[0]["or"][1]["date"]["on_or_before"],
            serde_json::json!("2026-03-10")
        );
        assert_eq!(clauses[1]["checkbox"]["equals"], serde_json::json!(false));

        assert!(build_filter(ItemFilter::all(today)).is_none());
    }

    #[test]
    fn test_classify_status() {
        use reqwest::StatusCode;

        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            StoreError::Permanent(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            StoreError::Permanent(_)
        ));
    }

    #[test]
    fn test_next_cursor() {
        let more = serde_json::json!({ "has_more": true, "next_cursor": "abc" });
        assert_eq!(next_cursor(&more), Some("abc".to_string()));

        let done = serde_json::json!({ "has_more": false, "next_cursor": null });
        assert_eq!(next_cursor(&done), None);
    }

    #[test]
    fn test_config_title_shape() {
        assert_eq!(config_title("review_schedule"), "__CONFIG_review_schedule__");
    }

    #[test]
    fn test_parse_date_handles_datetime() {
        assert_eq!(
            parse_date("2026-03-10T08:00:00.000+01:00"),
            NaiveDate::from_ymd_opt(2026, 3, 10)
        );
        assert_eq!(parse_date("2026-03-10"), NaiveDate::from_ymd_opt(2026, 3, 10));
        assert_eq!(parse_date("bad"), None);
    }
}
