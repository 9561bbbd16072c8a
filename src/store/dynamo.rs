use std::{collections::HashMap, env, future::Future, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dynomite::{
    dynamodb::{
        AttributeValue, DeleteItemError, DeleteItemInput, DynamoDb, DynamoDbClient, GetItemError,
        GetItemInput, PutItemError, PutItemInput,
    },
    Attribute,
    AttributeError::{self, MissingField},
    FromAttributes, Item,
};
use futures_retry::FutureRetry;
use rusoto_core::{Region, RusotoError};
use tracing::debug;

use super::LockStore;
use crate::{
    lock::LockDocument,
    util::{exception::StoreError, retry::FixedCountWithDelayStrategy},
};

static DEFAULT_TABLE: &str = "doc_locks";

type ItemAttributes = HashMap<String, AttributeValue>;

/// Connection settings for [`DynamoStore`].
#[derive(Debug, Clone)]
pub struct DynamoConfig {
    pub table_name: String,
    pub region: Region,
    /// Attempts per request when DynamoDB reports a transient failure.
    pub max_attempts: usize,
    pub retry_delay: Duration,
}

impl Default for DynamoConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE.to_string(),
            region: Region::default(),
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl DynamoConfig {
    /// Reads `DOC_LOCK_TABLE` and `DYNAMODB_ENDPOINT` (e.g. DynamoDB Local); the region
    /// comes from the usual `AWS_DEFAULT_REGION` / `AWS_REGION` variables.
    pub fn from_env() -> Self {
        let table_name = env::var("DOC_LOCK_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string());
        let region = match env::var("DYNAMODB_ENDPOINT") {
            Ok(endpoint) => Region::Custom {
                name: Region::default().name().to_string(),
                endpoint,
            },
            Err(_) => Region::default(),
        };

        Self {
            table_name,
            region,
            ..Self::default()
        }
    }
}

#[derive(Item, Debug, Clone, PartialEq)]
struct LockItem {
    #[dynomite(partition_key)]
    id: String,
    /// RFC 3339, UTC.
    expiration: String,
    version: String,
}

impl LockItem {
    fn new(doc: &LockDocument, version: String) -> Self {
        // RFC 3339 stops at year 9999; later expirations are stored as its last second.
        let expiration = match latest_persistable() {
            Some(latest) if doc.expiration > latest => latest,
            _ => doc.expiration,
        };

        Self {
            id: doc.id.clone(),
            expiration: expiration.to_rfc3339(),
            version,
        }
    }

    fn into_document(self) -> Result<LockDocument, StoreError> {
        let expiration = DateTime::parse_from_rfc3339(&self.expiration)
            .map_err(|e| {
                StoreError::NonRetryable(format!(
                    "lock '{}' has an unreadable expiration: {}",
                    self.id, e
                ))
            })?
            .with_timezone(&Utc);

        Ok(LockDocument {
            id: self.id,
            expiration,
        })
    }
}

/// Lock store backed by a DynamoDB table whose partition key is the string `id`.
pub struct DynamoStore {
    dynamo_client: DynamoDbClient,
    config: DynamoConfig,
}

impl DynamoStore {
    pub fn new(config: DynamoConfig) -> Self {
        Self::with_client(DynamoDbClient::new(config.region.clone()), config)
    }

    pub fn with_client(dynamo_client: DynamoDbClient, config: DynamoConfig) -> Self {
        Self {
            dynamo_client,
            config,
        }
    }

    fn key(id: &str) -> ItemAttributes {
        let mut key = HashMap::new();
        key.insert("id".to_string(), id.to_string().into_attr());
        key
    }

    async fn with_retry<T, F, Fut>(&self, request: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Unpin,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let strategy =
            FixedCountWithDelayStrategy::new(self.config.max_attempts, self.config.retry_delay);
        match FutureRetry::new(request, strategy).await {
            Ok((value, _attempts)) => Ok(value),
            Err((err, attempts)) => {
                debug!(attempts = attempts, error = %err, "DynamoDB request failed");
                Err(err)
            }
        }
    }

    async fn put(&self, input: PutItemInput, id: &str) -> Result<(), StoreError> {
        let client = &self.dynamo_client;
        self.with_retry(|| {
            let input = input.clone();
            async move {
                client
                    .put_item(input)
                    .await
                    .map(|_| ())
                    .map_err(|err| put_error(id, err))
            }
        })
        .await
    }
}

fn latest_persistable() -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|day| day.and_hms_opt(23, 59, 59))
        .map(|latest| Utc.from_utc_datetime(&latest))
}

/// `DeleteItem` with `ALL_OLD` hands back no attributes when nothing was there.
fn deleted(id: &str, old_attributes: Option<ItemAttributes>) -> Result<(), StoreError> {
    match old_attributes {
        Some(attributes) if !attributes.is_empty() => Ok(()),
        _ => Err(StoreError::NotFound(id.to_string())),
    }
}

fn new_version() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn names(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(placeholder, name)| (placeholder.to_string(), name.to_string()))
        .collect()
}

fn put_error(id: &str, err: RusotoError<PutItemError>) -> StoreError {
    match err {
        RusotoError::Service(PutItemError::ConditionalCheckFailed(_)) => {
            StoreError::Conflict(id.to_string())
        }
        RusotoError::Service(PutItemError::ProvisionedThroughputExceeded(msg))
        | RusotoError::Service(PutItemError::RequestLimitExceeded(msg))
        | RusotoError::Service(PutItemError::InternalServerError(msg))
        | RusotoError::Service(PutItemError::TransactionConflict(msg)) => {
            StoreError::Retryable(msg)
        }
        RusotoError::HttpDispatch(err) => StoreError::Retryable(err.to_string()),
        other => StoreError::NonRetryable(other.to_string()),
    }
}

fn delete_error(err: RusotoError<DeleteItemError>) -> StoreError {
    match err {
        RusotoError::Service(DeleteItemError::ProvisionedThroughputExceeded(msg))
        | RusotoError::Service(DeleteItemError::RequestLimitExceeded(msg))
        | RusotoError::Service(DeleteItemError::InternalServerError(msg))
        | RusotoError::Service(DeleteItemError::TransactionConflict(msg)) => {
            StoreError::Retryable(msg)
        }
        RusotoError::HttpDispatch(err) => StoreError::Retryable(err.to_string()),
        other => StoreError::NonRetryable(other.to_string()),
    }
}

fn get_error(err: RusotoError<GetItemError>) -> StoreError {
    match err {
        RusotoError::Service(GetItemError::ProvisionedThroughputExceeded(msg))
        | RusotoError::Service(GetItemError::RequestLimitExceeded(msg))
        | RusotoError::Service(GetItemError::InternalServerError(msg)) => {
            StoreError::Retryable(msg)
        }
        RusotoError::HttpDispatch(err) => StoreError::Retryable(err.to_string()),
        other => StoreError::NonRetryable(other.to_string()),
    }
}

fn attribute_error(err: AttributeError) -> StoreError {
    match err {
        AttributeError::InvalidFormat => {
            StoreError::NonRetryable("Attribute contains an invalid format".to_string())
        }
        AttributeError::InvalidType => {
            StoreError::NonRetryable("Attribute contains invalid type".to_string())
        }
        MissingField { name } => {
            StoreError::NonRetryable(format!("Attribute '{}' was missing", name))
        }
    }
}

#[async_trait]
impl LockStore for DynamoStore {
    type Version = String;

    async fn insert_if_absent(&self, doc: &LockDocument) -> Result<String, StoreError> {
        let version = new_version();
        let input = PutItemInput {
            table_name: self.config.table_name.clone(),
            item: LockItem::new(doc, version.clone()).into(),
            condition_expression: Some("attribute_not_exists(#id)".to_string()),
            expression_attribute_names: Some(names(&[("#id", "id")])),
            ..PutItemInput::default()
        };

        self.put(input, &doc.id).await?;
        debug!(lock_id = %doc.id, version = %version, "created lock item");
        Ok(version)
    }

    async fn conditional_replace(
        &self,
        doc: &LockDocument,
        expected: &String,
    ) -> Result<String, StoreError> {
        let version = new_version();
        let mut values = HashMap::new();
        values.insert(":expected".to_string(), expected.clone().into_attr());
        let input = PutItemInput {
            table_name: self.config.table_name.clone(),
            item: LockItem::new(doc, version.clone()).into(),
            condition_expression: Some("#version = :expected".to_string()),
            expression_attribute_names: Some(names(&[("#version", "version")])),
            expression_attribute_values: Some(values),
            ..PutItemInput::default()
        };

        self.put(input, &doc.id).await?;
        Ok(version)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let client = &self.dynamo_client;
        let input = DeleteItemInput {
            table_name: self.config.table_name.clone(),
            key: Self::key(id),
            return_values: Some("ALL_OLD".to_string()),
            ..DeleteItemInput::default()
        };

        let output = self
            .with_retry(|| {
                let input = input.clone();
                async move { client.delete_item(input).await.map_err(delete_error) }
            })
            .await?;

        deleted(id, output.attributes)
    }

    async fn get(&self, id: &str) -> Result<Option<LockDocument>, StoreError> {
        let client = &self.dynamo_client;
        let input = GetItemInput {
            table_name: self.config.table_name.clone(),
            key: Self::key(id),
            consistent_read: Some(true),
            ..GetItemInput::default()
        };

        let output = self
            .with_retry(|| {
                let input = input.clone();
                async move { client.get_item(input).await.map_err(get_error) }
            })
            .await?;

        match output.item {
            Some(item) => {
                let item = LockItem::from_attrs(item).map_err(attribute_error)?;
                Ok(Some(item.into_document()?))
            }
            None => Ok(None),
        }
    }
}
