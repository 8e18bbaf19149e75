//! Managed remote relational store reached over a PostgREST-style HTTP API.
//!
//! Expected table (one row per node):
//!
//! ```sql
//! create table context_nodes (
//!   tenant_id    text   not null,
//!   level        text   not null,
//!   id           text   not null,
//!   parent_level text,
//!   parent_id    text,
//!   data         jsonb  not null,
//!   policies     jsonb  not null default '{}',
//!   version      bigint not null,
//!   created_at   timestamptz not null,
//!   updated_at   timestamptz not null,
//!   primary key (tenant_id, level, id),
//!   foreign key (tenant_id, parent_level, parent_id)
//!     references context_nodes (tenant_id, level, id) on delete restrict
//! );
//! ```
//!
//! The primary key and the restricting foreign key give the same guarantees the embedded
//! store gets from its transactions.

use crate::error::StorageError;
use crate::http::HttpBridge;
use crate::store::{ContextNode, InsertOutcome, NodeStore, RemoveOutcome, SwapOutcome};
use crate::types::{ContextData, Level, MergePolicy, NodeRef, TenantId};
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Serialize, Deserialize)]
struct NodeRow {
    tenant_id: String,
    level: Level,
    id: String,
    parent_level: Option<Level>,
    parent_id: Option<String>,
    data: Map<String, Value>,
    #[serde(default)]
    policies: BTreeMap<String, MergePolicy>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NodeRow {
    fn from_node(tenant: &TenantId, node: &ContextNode) -> Self {
        Self {
            tenant_id: tenant.as_str().to_string(),
            level: node.level,
            id: node.id.clone(),
            parent_level: node.parent.as_ref().map(|p| p.level),
            parent_id: node.parent.as_ref().map(|p| p.id.clone()),
            data: node.data.values.clone(),
            policies: node.data.policies.clone(),
            version: node.version,
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }

    fn into_node(self) -> Result<ContextNode, StorageError> {
        let parent = match (self.parent_level, self.parent_id) {
            (Some(level), Some(id)) => Some(NodeRef::new(level, id)),
            (None, None) => None,
            _ => {
                return Err(StorageError::Serialization(format!(
                    "Row {}/{} has a partial parent reference",
                    self.level, self.id
                )))
            }
        };
        Ok(ContextNode {
            level: self.level,
            id: self.id,
            parent,
            data: ContextData {
                values: self.data,
                policies: self.policies,
            },
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChildRow {
    level: Level,
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PostgrestError {
    fn is(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    fn into_storage_error(self) -> StorageError {
        StorageError::Remote {
            status: StatusCode::CONFLICT.as_u16(),
            message: self.message.unwrap_or_default(),
        }
    }
}

/// A rejected DELETE only means "children exist" for a foreign-key violation.
fn delete_rejection(err: PostgrestError) -> Result<(), StorageError> {
    if err.is(PG_FOREIGN_KEY_VIOLATION) {
        Ok(())
    } else {
        Err(err.into_storage_error())
    }
}

/// Remote implementation of NodeStore
pub struct RemoteNodeStore {
    http: HttpBridge,
    base_url: String,
    api_key: Option<String>,
    table: String,
    tenant: TenantId,
}

impl RemoteNodeStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        table: impl Into<String>,
        tenant: TenantId,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let http = HttpBridge::new(timeout).map_err(StorageError::Backend)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            table: table.into(),
            tenant,
        })
    }

    fn request(&self, method: Method, filters: &[(&str, String)]) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, self.table);
        let mut builder = self
            .http
            .client()
            .request(method, url)
            .query(&[("tenant_id", format!("eq.{}", self.tenant))])
            .query(filters);
        if let Some(key) = &self.api_key {
            builder = builder
                .header("apikey", key)
                .header("Authorization", format!("Bearer {}", key));
        }
        builder
    }

    fn node_filters(node: &NodeRef) -> Vec<(&'static str, String)> {
        vec![
            ("level", format!("eq.{}", node.level)),
            ("id", format!("eq.{}", node.id)),
        ]
    }

    /// Send a request and decode a JSON array of rows.
    fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<Vec<T>, StorageError> {
        self.http.block_on(async {
            let response = builder.send().await.map_err(map_http_error)?;
            let response = check_status(response).await?;
            response
                .json::<Vec<T>>()
                .await
                .map_err(|e| StorageError::Serialization(format!("Failed to parse rows: {}", e)))
        })
    }

    /// Send a request whose failure body may carry a Postgres error code.
    fn execute(&self, builder: RequestBuilder) -> Result<Result<Vec<NodeRow>, PostgrestError>, StorageError> {
        self.http.block_on(async {
            let response = builder.send().await.map_err(map_http_error)?;
            if response.status() == StatusCode::CONFLICT {
                let body = response.json::<PostgrestError>().await.unwrap_or_default();
                return Ok(Err(body));
            }
            let response = check_status(response).await?;
            let rows = response
                .json::<Vec<NodeRow>>()
                .await
                .map_err(|e| StorageError::Serialization(format!("Failed to parse rows: {}", e)))?;
            Ok(Ok(rows))
        })
    }
}

async fn check_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(StorageError::Remote {
        status: status.as_u16(),
        message,
    })
}

fn map_http_error(error: reqwest::Error) -> StorageError {
    if error.is_timeout() {
        StorageError::Backend(format!("Remote store timeout: {}", error))
    } else if error.is_connect() {
        StorageError::Backend(format!("Remote store connection error: {}", error))
    } else {
        StorageError::Backend(format!("Remote store HTTP error: {}", error))
    }
}

impl NodeStore for RemoteNodeStore {
    fn backend_name(&self) -> &'static str {
        "remote"
    }

    fn get(&self, node: &NodeRef) -> Result<Option<ContextNode>, StorageError> {
        let rows: Vec<NodeRow> = self.fetch(self.request(Method::GET, &Self::node_filters(node)))?;
        rows.into_iter().next().map(NodeRow::into_node).transpose()
    }

    fn insert(&self, node: &ContextNode) -> Result<InsertOutcome, StorageError> {
        if let Some(parent) = &node.parent {
            if self.get(parent)?.is_none() {
                return Ok(InsertOutcome::ParentMissing);
            }
        }
        let builder = self
            .request(Method::POST, &[])
            .header("Prefer", "return=representation")
            .json(&NodeRow::from_node(&self.tenant, node));
        match self.execute(builder)? {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(err) => match err.code.as_deref() {
                Some(PG_UNIQUE_VIOLATION) => Ok(InsertOutcome::AlreadyExists),
                // parent removed between the check and the insert
                Some(PG_FOREIGN_KEY_VIOLATION) => Ok(InsertOutcome::ParentMissing),
                _ => Err(err.into_storage_error()),
            },
        }
    }

    fn compare_and_swap(
        &self,
        node: &NodeRef,
        expected_version: u64,
        next: &ContextNode,
    ) -> Result<SwapOutcome, StorageError> {
        let mut filters = Self::node_filters(node);
        filters.push(("version", format!("eq.{}", expected_version)));
        let body = json!({
            "data": next.data.values,
            "policies": next.data.policies,
            "version": next.version,
            "updated_at": next.updated_at,
        });
        let builder = self
            .request(Method::PATCH, &filters)
            .header("Prefer", "return=representation")
            .json(&body);
        let rows: Vec<NodeRow> = self.fetch(builder)?;
        if !rows.is_empty() {
            return Ok(SwapOutcome::Swapped);
        }
        match self.get(node)? {
            Some(current) => Ok(SwapOutcome::VersionMismatch {
                current: current.version,
            }),
            None => Ok(SwapOutcome::Missing),
        }
    }

    fn remove(&self, node: &NodeRef) -> Result<RemoveOutcome, StorageError> {
        let children = self.children(node)?;
        if !children.is_empty() {
            return Ok(RemoveOutcome::HasChildren(children.len()));
        }
        let builder = self
            .request(Method::DELETE, &Self::node_filters(node))
            .header("Prefer", "return=representation");
        match self.execute(builder)? {
            Ok(rows) if rows.is_empty() => Ok(RemoveOutcome::Missing),
            Ok(_) => Ok(RemoveOutcome::Removed),
            Err(err) => {
                debug!(node = %node, code = ?err.code, "Remote delete rejected");
                delete_rejection(err)?;
                let count = self.children(node)?.len();
                Ok(RemoveOutcome::HasChildren(count.max(1)))
            }
        }
    }

    fn children(&self, node: &NodeRef) -> Result<Vec<NodeRef>, StorageError> {
        let filters = [
            ("parent_level", format!("eq.{}", node.level)),
            ("parent_id", format!("eq.{}", node.id)),
            ("select", "level,id".to_string()),
            ("order", "created_at.asc".to_string()),
        ];
        let rows: Vec<ChildRow> = self.fetch(self.request(Method::GET, &filters))?;
        Ok(rows
            .into_iter()
            .map(|row| NodeRef::new(row.level, row.id))
            .collect())
    }

    fn list(&self, level: Level) -> Result<Vec<ContextNode>, StorageError> {
        let filters = [
            ("level", format!("eq.{}", level)),
            ("order", "created_at.asc".to_string()),
        ];
        let rows: Vec<NodeRow> = self.fetch(self.request(Method::GET, &filters))?;
        rows.into_iter().map(NodeRow::into_node).collect()
    }
}
