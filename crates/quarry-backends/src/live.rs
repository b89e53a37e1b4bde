//! The restricted live store backend.
//!
//! Document storage itself sits behind [`CollectionStore`]; the backend
//! applies the shared filter semantics on top with the date and amount
//! columns each known collection uses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use quarry_contracts::{
    error::QuarryResult,
    tool::{AnalyzeArgs, CollectionSchema, DataArg, QueryFilters, Row, ToolError, ToolResult},
};
use quarry_core::traits::DataBackend;

use crate::{
    analysis,
    filter::{apply_filters, FieldMap},
};

/// Where live rows are loaded from.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// All rows of `collection`; an unknown collection is empty.
    async fn load(&self, collection: &str) -> QuarryResult<Vec<Row>>;
}

/// A `CollectionStore` held in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryCollectionStore {
    collections: RwLock<HashMap<String, Vec<Row>>>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows of `collection`.
    pub fn insert(&self, collection: impl Into<String>, rows: Vec<Row>) {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        collections.insert(collection.into(), rows);
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    async fn load(&self, collection: &str) -> QuarryResult<Vec<Row>> {
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}

/// Column roles of the collections the product ships with. Anything else
/// dates by `createdAt` and measures by `value`.
pub fn field_map_for(collection: &str) -> FieldMap {
    match collection {
        "finance_transactions" => FieldMap::new("date", "amount", "category"),
        "sales_deals" => FieldMap::new("expectedCloseDate", "value", "category"),
        "hr_employees" => FieldMap::new("hireDate", "value", "category"),
        _ => FieldMap::new("createdAt", "value", "category"),
    }
}

const FINANCE_FIELDS: &[&str] = &[
    "id",
    "date",
    "amount",
    "category",
    "description",
    "type",
    "currency",
    "status",
    "vendor",
    "department",
];
const SALES_FIELDS: &[&str] = &[
    "id",
    "name",
    "company",
    "value",
    "stage",
    "owner",
    "expectedCloseDate",
    "probability",
    "createdAt",
];
const HR_FIELDS: &[&str] = &[
    "id",
    "firstName",
    "lastName",
    "email",
    "department",
    "role",
    "hireDate",
    "salary",
];

/// Declared fields of the shipped collections.
fn known_fields(collection: &str) -> Option<&'static [&'static str]> {
    match collection {
        "finance_transactions" => Some(FINANCE_FIELDS),
        "sales_deals" => Some(SALES_FIELDS),
        "hr_employees" => Some(HR_FIELDS),
        _ => None,
    }
}

/// Serves any collection of a [`CollectionStore`]. Which collections a
/// caller may reach is decided by the access policy, never here.
#[derive(Clone)]
pub struct LiveBackend {
    store: Arc<dyn CollectionStore>,
}

impl LiveBackend {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataBackend for LiveBackend {
    fn name(&self) -> &str {
        "live"
    }

    async fn query_collection(&self, collection: &str, filters: &QueryFilters) -> QuarryResult<Vec<Row>> {
        let rows = self.store.load(collection).await?;
        debug!(collection = %collection, loaded = rows.len(), "live rows loaded");
        Ok(apply_filters(&rows, filters, &field_map_for(collection)))
    }

    async fn analyze_data(&self, collection: Option<&str>, args: &AnalyzeArgs) -> QuarryResult<ToolResult> {
        let fields = collection.map(field_map_for).unwrap_or_default();
        let rows = match (&args.data, collection) {
            (DataArg::Inline(rows), _) => rows.clone(),
            (DataArg::Absent, Some(name)) => self.store.load(name).await?,
            (DataArg::Absent, None) => {
                return Ok(ToolError::InvalidArguments {
                    reason: "analyze_data needs data or a collection".to_string(),
                }
                .into())
            }
            (DataArg::FromSteps(_), _) => {
                return Ok(ToolError::InvalidArguments {
                    reason: "data references plan steps that were not resolved".to_string(),
                }
                .into())
            }
        };
        Ok(analysis::analyze(
            &rows,
            args.analysis_type,
            args.group_by.as_deref(),
            args.metric.as_deref(),
            &fields,
        ))
    }

    async fn collection_schema(&self, collection: &str) -> QuarryResult<CollectionSchema> {
        let fields = match known_fields(collection) {
            Some(fields) => fields.iter().map(|f| f.to_string()).collect(),
            None => self
                .store
                .load(collection)
                .await?
                .first()
                .map(|row| row.keys().cloned().collect())
                .unwrap_or_default(),
        };
        Ok(CollectionSchema {
            collection: collection.to_string(),
            fields,
            row_count: None,
            row_indices: false,
        })
    }
}
