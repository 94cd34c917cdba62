use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Row;

/// How rows returned by several stores are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMode {
    /// Concatenates rows, keeping the first row seen for each identity key.
    Union,
    /// Composes rows sharing an identity key into wider rows.
    Join,
    /// Keeps, per identity key, the row with the latest update timestamp.
    Merge,
}

/// What a single target store is asked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TargetRequest {
    /// Runs the query text and parameters of the enclosing [`FederatedQuerySpec`].
    Shared,
    /// Runs store-native query text instead of the shared one.
    Query { text: String, params: Vec<Value> },
    /// Runs a similarity search against a vector store.
    Similarity {
        collection: String,
        vector: Vec<f32>,
        limit: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedTarget {
    pub store: String,
    pub request: TargetRequest,
}

impl FederatedTarget {
    pub fn store(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            request: TargetRequest::Shared,
        }
    }

    pub fn with_query(store: impl Into<String>, text: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            store: store.into(),
            request: TargetRequest::Query {
                text: text.into(),
                params,
            },
        }
    }

    pub fn similarity(
        store: impl Into<String>,
        collection: impl Into<String>,
        vector: Vec<f32>,
        limit: usize,
    ) -> Self {
        Self {
            store: store.into(),
            request: TargetRequest::Similarity {
                collection: collection.into(),
                vector,
                limit,
            },
        }
    }
}

/// One logical query fanned out to several stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedQuerySpec {
    pub text: String,
    pub params: Vec<Value>,
    pub targets: Vec<FederatedTarget>,
    pub mode: CombineMode,
}

impl FederatedQuerySpec {
    pub fn new(text: impl Into<String>, targets: Vec<FederatedTarget>, mode: CombineMode) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
            targets,
            mode,
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

/// A store that failed or timed out during a federated query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedWarning {
    pub store: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedQueryResult {
    pub rows: Vec<Row>,
    /// Stores that answered, in target order.
    pub sources_queried: Vec<String>,
    pub elapsed_ms: u64,
    pub row_count: usize,
    pub warnings: Vec<FederatedWarning>,
}
