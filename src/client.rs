use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{Dataset, FetchError};
use crate::session::{decode_sessions, decode_users, Session, User};

pub const SESSIONS_PATH: &str = "api/get_sessions";
pub const USERS_PATH: &str = "api/get_users";

/// Where dashboard records come from.
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, FetchError>;
    async fn fetch_users(&self) -> Result<Vec<User>, FetchError>;
}

#[derive(Clone)]
pub struct HttpSource {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: Url) -> Self {
        Self { base_url, client: reqwest::Client::new() }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn fetch_array(&self, dataset: Dataset, path: &str) -> Result<Vec<Value>, FetchError> {
        let url = self.endpoint(path);
        debug!(%url, "fetching {dataset}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network { dataset, message: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(FetchError::Status { dataset, status: resp.status().as_u16() });
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode { dataset, message: e.to_string() })?;
        match body {
            Value::Array(items) => Ok(items),
            other => Err(FetchError::Decode {
                dataset,
                message: format!("expected a JSON array, got {}", json_kind(&other)),
            }),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl DashboardSource for HttpSource {
    async fn fetch_sessions(&self) -> Result<Vec<Session>, FetchError> {
        let items = self.fetch_array(Dataset::Sessions, SESSIONS_PATH).await?;
        Ok(decode_sessions(items))
    }

    async fn fetch_users(&self) -> Result<Vec<User>, FetchError> {
        let items = self.fetch_array(Dataset::Users, USERS_PATH).await?;
        Ok(decode_users(items))
    }
}
