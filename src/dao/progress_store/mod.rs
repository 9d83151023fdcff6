/// HTTP implementation of the progress store.
pub mod http;
/// Lazy pagination shared by every listing operation.
pub mod pages;

use futures::future::BoxFuture;

use crate::dao::models::{
    Page, PageRequest, ParticipantEntity, ParticipantUpdate, TableEntity, TablePatch,
};
use crate::dao::storage::StoreResult;

/// Abstraction over the persistence layer for tables and participant rows.
///
/// The backing service offers no ranking, aggregation, or cross-row
/// transactions; everything above this trait is built on plain per-row
/// reads and upserts.
pub trait ProgressStore: Send + Sync {
    fn create_table(
        &self,
        table_id: String,
        display_name: String,
    ) -> BoxFuture<'static, StoreResult<TableEntity>>;
    fn get_table(&self, table_id: String) -> BoxFuture<'static, StoreResult<TableEntity>>;
    fn patch_table(
        &self,
        table_id: String,
        patch: TablePatch,
    ) -> BoxFuture<'static, StoreResult<TableEntity>>;
    fn list_tables(&self, page: PageRequest) -> BoxFuture<'static, StoreResult<Page<TableEntity>>>;
    fn put_user(
        &self,
        table_id: String,
        username: String,
        update: ParticipantUpdate,
    ) -> BoxFuture<'static, StoreResult<ParticipantEntity>>;
    fn get_user(
        &self,
        table_id: String,
        username: String,
    ) -> BoxFuture<'static, StoreResult<ParticipantEntity>>;
    fn list_users(
        &self,
        table_id: String,
        page: PageRequest,
    ) -> BoxFuture<'static, StoreResult<Page<ParticipantEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StoreResult<()>>;
}
