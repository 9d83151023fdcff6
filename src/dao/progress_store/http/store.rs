use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::ValidationError;

use crate::dao::{
    models::{Page, PageRequest, ParticipantEntity, ParticipantUpdate, TableEntity, TablePatch},
    progress_store::ProgressStore,
    storage::{StoreError, StoreResult},
    validation::{validate_table_id, validate_username},
};

use super::{
    config::HttpStoreConfig,
    error::{HttpResult, HttpStoreError},
    models::{
        CreateTableBody, ParticipantDocument, PutUserBody, TableDocument, TablePageDocument,
        TablePatchBody, UserPageDocument,
    },
    retry::RetryPolicy,
};

/// Client for the remote table service.
///
/// Cheap to clone; every logical call is retried according to the
/// configured [`RetryPolicy`], with 4xx-equivalent responses surfaced
/// immediately as typed errors.
#[derive(Clone)]
pub struct HttpProgressStore {
    client: Client,
    base_url: Arc<str>,
    retry: RetryPolicy,
}

impl HttpProgressStore {
    /// Build a client for the remote table service.
    pub fn connect(config: HttpStoreConfig) -> HttpResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| HttpStoreError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            retry: config.retry,
        })
    }

    /// Issue one logical call: build, send, classify, and decode, retrying
    /// transient failures within the shared budget.
    async fn call<T>(
        &self,
        method: Method,
        path: String,
        query: Vec<(&'static str, String)>,
        body: Option<Value>,
    ) -> HttpResult<T>
    where
        T: DeserializeOwned,
    {
        self.retry
            .run(&path, || {
                let client = self.client.clone();
                let url = format!("{}{}", self.base_url, path);
                let method = method.clone();
                let query = query.clone();
                let body = body.clone();
                let path = path.clone();

                async move {
                    let mut builder = client.request(method, url);
                    if !query.is_empty() {
                        builder = builder.query(&query);
                    }
                    if let Some(ref json) = body {
                        builder = builder.json(json);
                    }

                    let response =
                        builder
                            .send()
                            .await
                            .map_err(|source| HttpStoreError::RequestSend {
                                path: path.clone(),
                                source,
                            })?;

                    let response = classify(&path, response).await?;
                    response
                        .json::<T>()
                        .await
                        .map_err(|source| HttpStoreError::DecodeResponse { path, source })
                }
            })
            .await
    }
}

/// Map an error status onto the typed error taxonomy, reading the body for
/// validation rejections.
async fn classify(path: &str, response: Response) -> HttpResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::BAD_REQUEST => {
            let message = response.text().await.unwrap_or_default();
            HttpStoreError::InvalidArgument {
                path: path.to_string(),
                message,
            }
        }
        StatusCode::NOT_FOUND => HttpStoreError::NotFound {
            path: path.to_string(),
        },
        StatusCode::CONFLICT => HttpStoreError::AlreadyExists {
            path: path.to_string(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            HttpStoreError::TransientStatus {
                path: path.to_string(),
                status,
            }
        }
        status if status.is_server_error() => HttpStoreError::TransientStatus {
            path: path.to_string(),
            status,
        },
        other => HttpStoreError::UnexpectedStatus {
            path: path.to_string(),
            status: other,
        },
    })
}

fn invalid(err: ValidationError) -> StoreError {
    let message = match &err.message {
        Some(message) => message.to_string(),
        None => err.code.to_string(),
    };
    StoreError::InvalidArgument { message }
}

fn serialize_body<T: serde::Serialize>(path: &str, body: &T) -> Result<Value, StoreError> {
    serde_json::to_value(body)
        .map_err(|source| HttpStoreError::SerializeBody {
            path: path.to_string(),
            source,
        })
        .map_err(StoreError::from)
}

impl ProgressStore for HttpProgressStore {
    fn create_table(
        &self,
        table_id: String,
        display_name: String,
    ) -> BoxFuture<'static, StoreResult<TableEntity>> {
        let store = self.clone();
        Box::pin(async move {
            if let Err(err) = validate_table_id(&table_id) {
                return Err(invalid(err));
            }

            let path = "/tables".to_string();
            let body = serialize_body(
                &path,
                &CreateTableBody {
                    table_id,
                    display_name,
                },
            )?;
            let document: TableDocument = store
                .call(Method::POST, path.clone(), Vec::new(), Some(body))
                .await
                .map_err(StoreError::from)?;
            document.try_into_entity(&path).map_err(Into::into)
        })
    }

    fn get_table(&self, table_id: String) -> BoxFuture<'static, StoreResult<TableEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("/tables/{table_id}");
            let document: TableDocument = store
                .call(Method::GET, path.clone(), Vec::new(), None)
                .await
                .map_err(StoreError::from)?;
            document.try_into_entity(&path).map_err(Into::into)
        })
    }

    fn patch_table(
        &self,
        table_id: String,
        patch: TablePatch,
    ) -> BoxFuture<'static, StoreResult<TableEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("/tables/{table_id}");
            let body = serialize_body(&path, &TablePatchBody::from(patch))?;
            let document: TableDocument = store
                .call(Method::PATCH, path.clone(), Vec::new(), Some(body))
                .await
                .map_err(StoreError::from)?;
            document.try_into_entity(&path).map_err(Into::into)
        })
    }

    fn list_tables(&self, page: PageRequest) -> BoxFuture<'static, StoreResult<Page<TableEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let path = "/tables".to_string();
            let document: TablePageDocument = store
                .call(Method::GET, path.clone(), page_query(page), None)
                .await
                .map_err(StoreError::from)?;

            let mut items = Vec::with_capacity(document.tables.len());
            for table in document.tables {
                items.push(table.try_into_entity(&path)?);
            }
            Ok(Page {
                items,
                next_token: document.last_key,
            })
        })
    }

    fn put_user(
        &self,
        table_id: String,
        username: String,
        update: ParticipantUpdate,
    ) -> BoxFuture<'static, StoreResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            if let Err(err) = validate_username(&username) {
                return Err(invalid(err));
            }

            let path = format!("/tables/{table_id}/users/{username}");
            let body = serialize_body(&path, &PutUserBody::from(update))?;
            let document: ParticipantDocument = store
                .call(Method::PUT, path.clone(), Vec::new(), Some(body))
                .await
                .map_err(StoreError::from)?;
            document.try_into_entity(&path).map_err(Into::into)
        })
    }

    fn get_user(
        &self,
        table_id: String,
        username: String,
    ) -> BoxFuture<'static, StoreResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("/tables/{table_id}/users/{username}");
            let document: ParticipantDocument = store
                .call(Method::GET, path.clone(), Vec::new(), None)
                .await
                .map_err(StoreError::from)?;
            document.try_into_entity(&path).map_err(Into::into)
        })
    }

    fn list_users(
        &self,
        table_id: String,
        page: PageRequest,
    ) -> BoxFuture<'static, StoreResult<Page<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let path = format!("/tables/{table_id}/users");
            let document: UserPageDocument = store
                .call(Method::GET, path.clone(), page_query(page), None)
                .await
                .map_err(StoreError::from)?;

            let mut items = Vec::with_capacity(document.users.len());
            for user in document.users {
                items.push(user.try_into_entity(&path)?);
            }
            Ok(Page {
                items,
                next_token: document.last_key,
            })
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let _: Value = store
                .call(Method::GET, "/health".to_string(), Vec::new(), None)
                .await
                .map_err(StoreError::from)?;
            Ok(())
        })
    }
}

fn page_query(page: PageRequest) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(limit) = page.limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(token) = page.token {
        query.push(("lastKey", token));
    }
    query
}
