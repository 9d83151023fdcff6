//! Lazy, restartable iteration over paginated store listings.

use std::future::Future;
use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;

use crate::dao::models::{Page, PageRequest, ParticipantEntity, TableEntity};
use crate::dao::progress_store::ProgressStore;
use crate::dao::storage::{StoreError, StoreResult};

/// Turn a page-fetching operation into a lazy stream of items.
///
/// The stream follows continuation tokens until the backend reports no more
/// pages, so it is always finite. Nothing is fetched until the stream is
/// polled, and building a new stream restarts from the first page.
pub fn paginate<T, F, Fut>(page_size: usize, mut fetch: F) -> impl Stream<Item = StoreResult<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = StoreResult<Page<T>>>,
{
    try_stream! {
        let mut token: Option<String> = None;
        loop {
            let request = PageRequest {
                token: token.take(),
                limit: Some(page_size),
            };
            let page = fetch(request).await?;
            for item in page.items {
                yield item;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
    }
}

/// Stream every table, transparently following continuation tokens.
pub fn iter_tables(
    store: Arc<dyn ProgressStore>,
    page_size: usize,
) -> impl Stream<Item = StoreResult<TableEntity>> {
    paginate(page_size, move |page| store.list_tables(page))
}

/// Stream every participant of `table_id`, transparently following
/// continuation tokens.
pub fn iter_users(
    store: Arc<dyn ProgressStore>,
    table_id: String,
    page_size: usize,
) -> impl Stream<Item = StoreResult<ParticipantEntity>> {
    paginate(page_size, move |page| {
        store.list_users(table_id.clone(), page)
    })
}

/// Collect a user stream into a vector, surfacing the first failure.
pub async fn collect_users(
    store: Arc<dyn ProgressStore>,
    table_id: String,
    page_size: usize,
    max_entries: Option<usize>,
) -> Result<Vec<ParticipantEntity>, StoreError> {
    use futures::StreamExt;

    let mut stream = Box::pin(iter_users(store, table_id, page_size));
    let mut participants = Vec::new();
    while let Some(row) = stream.next().await {
        participants.push(row?);
        if let Some(limit) = max_entries {
            if participants.len() >= limit {
                break;
            }
        }
    }
    Ok(participants)
}
