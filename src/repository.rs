use std::{collections::{BTreeMap, HashMap}, sync::Arc};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::{
    Client,
    error::DisplayErrorContext,
    types::{AttributeValue, ReturnValue},
};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{config::DynamoConfig, models::Content};

/// RepositoryError
///
/// The closed set of failures every backend reports. Native backend signals (a
/// conditional-check failure, a missing item) are translated into `NotFound` or
/// `AlreadyExists` inside the implementation; anything else is flattened into
/// `Backend` with a human-readable description.
#[derive(Debug, Error, PartialEq)]
pub enum RepositoryError {
    #[error("content not found")]
    NotFound,
    #[error("content already exists")]
    AlreadyExists,
    #[error("content store failure: {0}")]
    Backend(String),
}

/// ContentRepository Trait
///
/// Defines the abstract contract for content persistence. Handlers only ever see this
/// trait, so the in-memory and DynamoDB backends are interchangeable.
///
/// Every mutation is atomic at the backend: existence checks and writes happen in a
/// single step, never as read-then-write. Dropping a returned future (client
/// disconnect) abandons the in-flight backend call.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// All content, ascending by id. Paging over large backends is internal.
    async fn list_content(&self) -> Result<Vec<Content>, RepositoryError>;
    async fn get_content(&self, id: &str) -> Result<Content, RepositoryError>;
    /// Inserts only if `item.id` is absent.
    async fn create_content(&self, item: Content) -> Result<Content, RepositoryError>;
    /// Renames an existing record and returns the post-update value.
    async fn update_content(&self, id: &str, name: &str) -> Result<Content, RepositoryError>;
    async fn delete_content(&self, id: &str) -> Result<(), RepositoryError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn ContentRepository>;

// --- In-memory backend ---

/// InMemoryRepository
///
/// A single reader/writer lock guards the whole keyed collection. Reads share the
/// lock, every mutation takes it exclusively, and callers always receive clones so
/// repository-held state cannot be changed through an alias. The `BTreeMap` keeps
/// listing order stable by id.
#[derive(Default)]
pub struct InMemoryRepository {
    items: RwLock<BTreeMap<String, Content>>,
}

impl InMemoryRepository {
    pub fn with_seed(seed: impl IntoIterator<Item = Content>) -> Self {
        let items = seed
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        Self {
            items: RwLock::new(items),
        }
    }
}

#[async_trait]
impl ContentRepository for InMemoryRepository {
    async fn list_content(&self) -> Result<Vec<Content>, RepositoryError> {
        let items = self.items.read().await;
        Ok(items.values().cloned().collect())
    }

    async fn get_content(&self, id: &str) -> Result<Content, RepositoryError> {
        let items = self.items.read().await;
        items.get(id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn create_content(&self, item: Content) -> Result<Content, RepositoryError> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Err(RepositoryError::AlreadyExists);
        }
        items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    async fn update_content(&self, id: &str, name: &str) -> Result<Content, RepositoryError> {
        let mut items = self.items.write().await;
        let item = items.get_mut(id).ok_or(RepositoryError::NotFound)?;
        item.name = name.to_string();
        Ok(item.clone())
    }

    async fn delete_content(&self, id: &str) -> Result<(), RepositoryError> {
        let mut items = self.items.write().await;
        items
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

// --- DynamoDB backend ---

const SCAN_PAGE_SIZE: i32 = 25;

/// DynamoContentRepository
///
/// Backed by a DynamoDB table keyed on the string attribute `id`. Atomicity comes
/// from conditional expressions rather than an in-process lock, since several
/// service replicas may write to the same table.
#[derive(Clone)]
pub struct DynamoContentRepository {
    client: Client,
    table: String,
    scan_page: i32,
}

impl DynamoContentRepository {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
            scan_page: SCAN_PAGE_SIZE,
        }
    }

    /// connect
    ///
    /// Resolves credentials through the default AWS provider chain (environment,
    /// web identity, assumed role) and checks the table with `DescribeTable` so a
    /// misconfigured deployment is detected at startup rather than on first request.
    pub async fn connect(config: &DynamoConfig) -> Result<Self, RepositoryError> {
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(builder.build());

        client
            .describe_table()
            .table_name(&config.table)
            .send()
            .await
            .map_err(|e| backend("describe table", e))?;

        Ok(Self::new(client, &config.table))
    }

    fn key(id: &str) -> HashMap<String, AttributeValue> {
        HashMap::from([("id".to_string(), AttributeValue::S(id.to_string()))])
    }
}

#[async_trait]
impl ContentRepository for DynamoContentRepository {
    async fn list_content(&self) -> Result<Vec<Content>, RepositoryError> {
        let mut result = Vec::new();
        let mut start_key = None;

        loop {
            let page = self
                .client
                .scan()
                .table_name(&self.table)
                .limit(self.scan_page)
                .consistent_read(true)
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| backend("scan", e))?;

            for item in page.items() {
                result.push(item_to_content(item)?);
            }

            start_key = page.last_evaluated_key().cloned();
            if start_key.is_none() {
                break;
            }
        }

        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }

    async fn get_content(&self, id: &str) -> Result<Content, RepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(id)))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| backend("get item", e))?;

        match output.item() {
            Some(item) => item_to_content(item),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn create_content(&self, item: Content) -> Result<Content, RepositoryError> {
        let result = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("id", AttributeValue::S(item.id.clone()))
            .item("name", AttributeValue::S(item.name.clone()))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(item),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(RepositoryError::AlreadyExists)
            }
            Err(e) => Err(backend("put item", e)),
        }
    }

    async fn update_content(&self, id: &str, name: &str) -> Result<Content, RepositoryError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(id)))
            .update_expression("SET #n = :name")
            .expression_attribute_names("#n", "name")
            .expression_attribute_values(":name", AttributeValue::S(name.to_string()))
            .condition_expression("attribute_exists(id)")
            .return_values(ReturnValue::AllNew)
            .send()
            .await;

        match result {
            Ok(output) => output
                .attributes()
                .ok_or_else(|| RepositoryError::Backend("update returned no attributes".into()))
                .and_then(item_to_content),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(RepositoryError::NotFound)
            }
            Err(e) => Err(backend("update item", e)),
        }
    }

    async fn delete_content(&self, id: &str) -> Result<(), RepositoryError> {
        let result = self
            .client
            .delete_item()
            .table_name(&self.table)
            .set_key(Some(Self::key(id)))
            .condition_expression("attribute_exists(id)")
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                Err(RepositoryError::NotFound)
            }
            Err(e) => Err(backend("delete item", e)),
        }
    }
}

fn backend<E: std::error::Error>(operation: &str, err: E) -> RepositoryError {
    RepositoryError::Backend(format!("{operation}: {}", DisplayErrorContext(err)))
}

/// item_to_content
///
/// Maps a DynamoDB item into `Content`. Both `id` and `name` must be string attributes.
pub fn item_to_content(item: &HashMap<String, AttributeValue>) -> Result<Content, RepositoryError> {
    let attr = |name: &str| {
        item.get(name)
            .and_then(|value| value.as_s().ok())
            .cloned()
            .ok_or_else(|| RepositoryError::Backend(format!("item missing {name} attribute")))
    };
    Ok(Content {
        id: attr("id")?,
        name: attr("name")?,
    })
}
