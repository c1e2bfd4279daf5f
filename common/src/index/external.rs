// External index gateway
// Mutations go through the index-mutation tool; pre-image reads go to the index HTTP API

use crate::config::IndexConfig;
use crate::errors::IndexError;
use crate::index::IndexGateway;
use crate::models::IndexOperation;
use crate::validation::DocumentBatch;
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

/// ExternalIndexGateway drives the index-mutation tool and the index read API
pub struct ExternalIndexGateway {
    tool: String,
    query_url: String,
    fetch_batch_size: usize,
    client: Client,
}

impl ExternalIndexGateway {
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| IndexError::ClientInit(e.to_string()))?;

        Ok(Self {
            tool: config.tool.clone(),
            query_url: config.query_url.trim_end_matches('/').to_string(),
            fetch_batch_size: config.fetch_batch_size.max(1),
            client,
        })
    }

    async fn run_tool(
        &self,
        index_name: &str,
        operation: &str,
        extra_args: &[&std::ffi::OsStr],
    ) -> Result<(), IndexError> {
        let flag = format!("--{}", operation);
        info!(tool = %self.tool, operation = operation, index_name = index_name, "Running index tool");

        let output = Command::new(&self.tool)
            .arg(&flag)
            .arg(index_name)
            .args(extra_args)
            .output()
            .await
            .map_err(|e| IndexError::ToolUnavailable {
                tool: self.tool.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            info!(index_name = index_name, stdout = %stdout.trim(), "Index tool output");
        }
        if !stderr.trim().is_empty() {
            info!(index_name = index_name, stderr = %stderr.trim(), "Index tool diagnostics");
        }

        if output.status.success() {
            Ok(())
        } else {
            error!(
                index_name = index_name,
                operation = operation,
                exit_code = ?output.status.code(),
                "Index tool failed"
            );
            Err(IndexError::ToolFailed {
                index_name: index_name.to_string(),
                operation: operation.to_string(),
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            })
        }
    }

    async fn apply(
        &self,
        index_name: &str,
        operation: IndexOperation,
        batch: &DocumentBatch,
    ) -> Result<usize, IndexError> {
        self.run_tool(
            index_name,
            &operation.to_string(),
            &[batch.source.as_os_str()],
        )
        .await?;
        Ok(batch.len())
    }

    // One read request; callers keep `ids` within fetch_batch_size
    async fn fetch_chunk(
        &self,
        index_name: &str,
        key_field: &str,
        ids: &[String],
        fields: &[String],
    ) -> Result<Vec<Map<String, Value>>, IndexError> {
        let field_list = std::iter::once(key_field.to_string())
            .chain(fields.iter().cloned())
            .collect::<Vec<_>>()
            .join(",");
        let rows = ids.len().to_string();
        let query = ids_query(key_field, ids);
        let params = [
            ("q", query.as_str()),
            ("fl", field_list.as_str()),
            ("rows", rows.as_str()),
            ("wt", "json"),
        ];

        let url = format!("{}/{}", self.query_url, index_name);
        debug!(url = %url, "Fetching current documents");

        let request_failed = |e: reqwest::Error| IndexError::RequestFailed {
            index_name: index_name.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/solr+json")
            .form(&params)
            .send()
            .await
            .map_err(request_failed)?
            .error_for_status()
            .map_err(request_failed)?;

        let body: Value = response.json().await.map_err(|e| IndexError::InvalidResponse {
            index_name: index_name.to_string(),
            reason: e.to_string(),
        })?;

        let docs = body
            .get("response")
            .and_then(|r| r.get("docs"))
            .and_then(Value::as_array)
            .ok_or_else(|| IndexError::InvalidResponse {
                index_name: index_name.to_string(),
                reason: "missing response.docs".to_string(),
            })?;

        docs.iter()
            .map(|doc| {
                doc.as_object().cloned().ok_or_else(|| IndexError::InvalidResponse {
                    index_name: index_name.to_string(),
                    reason: format!("document is not an object: {}", doc),
                })
            })
            .collect()
    }
}

/// Build `key:("a" OR "b")`, quoting ids so they are matched literally
pub fn ids_query(key_field: &str, ids: &[String]) -> String {
    let terms: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{}:({})", key_field, terms.join(" OR "))
}

#[async_trait]
impl IndexGateway for ExternalIndexGateway {
    #[instrument(skip(self, ids, fields), fields(index_name = index_name, ids = ids.len()))]
    async fn fetch(
        &self,
        index_name: &str,
        key_field: &str,
        ids: &[String],
        fields: &[String],
    ) -> Result<Vec<Map<String, Value>>, IndexError> {
        let mut docs = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.fetch_batch_size) {
            docs.extend(self.fetch_chunk(index_name, key_field, chunk, fields).await?);
        }
        Ok(docs)
    }

    #[instrument(skip(self, batch), fields(index_name = index_name, documents = batch.len()))]
    async fn insert(&self, index_name: &str, batch: &DocumentBatch) -> Result<usize, IndexError> {
        self.apply(index_name, IndexOperation::Insert, batch).await
    }

    #[instrument(skip(self, batch), fields(index_name = index_name, documents = batch.len()))]
    async fn update(&self, index_name: &str, batch: &DocumentBatch) -> Result<usize, IndexError> {
        self.apply(index_name, IndexOperation::Update, batch).await
    }

    #[instrument(skip(self))]
    async fn commit(&self, index_name: &str) -> Result<(), IndexError> {
        self.run_tool(index_name, "commit", &[]).await
    }
}
