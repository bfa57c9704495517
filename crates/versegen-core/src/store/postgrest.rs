use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{Filter, Query, TableStore};
use crate::choice::{value_text, Record};
use crate::error::StoreError;

/// HTTP client for a PostgREST endpoint (e.g. a Supabase project).
#[derive(Clone)]
pub struct PostgrestClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PostgrestClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, query: &Query) -> String {
        format!("{}/rest/v1/{}", self.base_url, query.table)
    }
}

/// Query-string parameters in PostgREST's filter syntax.
pub fn query_params(query: &Query) -> Vec<(String, String)> {
    let select = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.join(",")
    };

    let mut params = vec![("select".to_string(), select)];
    for filter in &query.filters {
        match filter {
            Filter::Eq(column, value) => {
                params.push((column.clone(), format!("eq.{}", param_text(value))));
            }
            Filter::NotNull(column) => {
                params.push((column.clone(), "not.is.null".to_string()));
            }
        }
    }
    if let Some(column) = &query.order {
        params.push(("order".to_string(), format!("{}.asc", column)));
    }
    params
}

fn param_text(value: &Value) -> String {
    value_text(value).unwrap_or_else(|| "null".to_string())
}

/// PostgREST error bodies carry a `message`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Record>(body)
        .ok()
        .and_then(|record| record.get("message").and_then(value_text))
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl TableStore for PostgrestClient {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, StoreError> {
        let url = self.url(query);
        debug!(table = %query.table, "dispatching store query");

        let response = self
            .client
            .get(&url)
            .query(&query_params(query))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| StoreError::Transport {
                table: query.table.clone(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                table: query.table.clone(),
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| StoreError::Decode {
                table: query.table.clone(),
                message: e.to_string(),
            })
    }
}
