use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{GigRepository, ListHint, RepositoryError};
use crate::normalize::RawRecord;

const PAGE_SIZE: usize = 100;
const USER_AGENT: &str = "gig-finder/0.1";

/// Connection details for an Appwrite-style document database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppwriteSettings {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: Option<String>,
    pub database_id: String,
    pub collection_id: String,
}

#[derive(Debug, Deserialize)]
struct DocumentList {
    #[serde(default)]
    documents: Vec<Value>,
}

pub struct AppwriteRepository {
    settings: AppwriteSettings,
    client: Client,
}

impl AppwriteRepository {
    pub fn new(settings: AppwriteSettings) -> Result<Self, RepositoryError> {
        for (name, value) in [
            ("endpoint", &settings.endpoint),
            ("project id", &settings.project_id),
            ("database id", &settings.database_id),
            ("collection id", &settings.collection_id),
        ] {
            if value.trim().is_empty() {
                return Err(RepositoryError::Unavailable(format!("{name} is not configured")));
            }
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| RepositoryError::Unavailable(err.to_string()))?;
        Ok(Self { settings, client })
    }

    fn documents_url(&self) -> Result<Url, RepositoryError> {
        let base = self.settings.endpoint.trim_end_matches('/');
        Url::parse(&format!(
            "{base}/databases/{}/collections/{}/documents",
            self.settings.database_id, self.settings.collection_id
        ))
        .map_err(|err| RepositoryError::Unavailable(format!("bad endpoint: {err}")))
    }

    fn list_url(&self, hint: &ListHint, cursor: Option<&str>) -> Result<Url, RepositoryError> {
        let mut url = self.documents_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            for query in page_queries(hint, cursor) {
                pairs.append_pair("queries[]", &query.to_string());
            }
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("X-Appwrite-Project", &self.settings.project_id);
        match &self.settings.api_key {
            Some(key) => builder.header("X-Appwrite-Key", key),
            None => builder,
        }
    }
}

fn page_queries(hint: &ListHint, cursor: Option<&str>) -> Vec<Value> {
    let mut queries = Vec::new();
    if hint.open_only {
        queries.push(json!({ "method": "isNull", "attribute": "acceptedBy" }));
    }
    if let Some(organizer) = &hint.organizer_id {
        queries.push(json!({ "method": "equal", "attribute": "churchIdStr", "values": [organizer] }));
    }
    queries.push(json!({ "method": "limit", "values": [PAGE_SIZE] }));
    if let Some(cursor) = cursor {
        queries.push(json!({ "method": "cursorAfter", "values": [cursor] }));
    }
    queries
}

fn status_error(status: StatusCode, body: &str, subject: &str) -> RepositoryError {
    match status {
        StatusCode::NOT_FOUND => RepositoryError::NotFound(subject.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RepositoryError::Forbidden(format!("{subject}: {body}"))
        }
        _ => RepositoryError::Unavailable(format!("status {status}: {body}")),
    }
}

#[async_trait]
impl GigRepository for AppwriteRepository {
    async fn list_gigs(&self, hint: &ListHint) -> Result<Vec<RawRecord>, RepositoryError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let url = self.list_url(hint, cursor.as_deref())?;
            let response = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(|err| RepositoryError::Unavailable(format!("gig list request failed: {err}")))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|err| RepositoryError::Unavailable(format!("gig list read failed: {err}")))?;
            if !status.is_success() {
                return Err(status_error(status, &body, "gig collection"));
            }

            let page: DocumentList =
                serde_json::from_str(&body).map_err(|err| RepositoryError::Decode(err.to_string()))?;
            let fetched = page.documents.len();
            let mut last_id = None;
            for document in page.documents {
                match document {
                    Value::Object(map) => {
                        last_id = map.get("$id").and_then(Value::as_str).map(str::to_string);
                        records.push(map);
                    }
                    other => warn!(document = %other, "skipping non-object document"),
                }
            }
            debug!(fetched, total = records.len(), "fetched gig page");

            if fetched < PAGE_SIZE {
                break;
            }
            match last_id {
                Some(id) => cursor = Some(id),
                None => {
                    warn!("full page without a document id, stopping pagination");
                    break;
                }
            }
        }

        Ok(records)
    }

    async fn delete_gig(&self, id: &str) -> Result<(), RepositoryError> {
        let mut url = self.documents_url()?;
        url.path_segments_mut()
            .map_err(|_| RepositoryError::Unavailable("endpoint cannot be a base".into()))?
            .push(id);
        let response = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|err| RepositoryError::Unavailable(format!("gig delete request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, id))
    }
}
