//! Live view callbacks

use crate::sphere::live::collection::Row;
use async_trait::async_trait;

/// Receives changes of a [`LiveView`](crate::sphere::live::LiveView)
#[async_trait]
pub trait ViewListener<T: Row>: Send + Sync {
    /// The whole projection was replaced (mount or refresh)
    async fn on_view_reset(&self, rows: Vec<T>);

    /// A row was added or replaced in place
    async fn on_row_upserted(&self, row: T);

    /// A row left the view (deleted, or no longer passes the view filter)
    async fn on_row_removed(&self, key: String);
}

/// No-op listener
pub struct EmptyViewListener;

#[async_trait]
impl<T: Row> ViewListener<T> for EmptyViewListener {
    async fn on_view_reset(&self, _rows: Vec<T>) {}

    async fn on_row_upserted(&self, _row: T) {}

    async fn on_row_removed(&self, _key: String) {}
}
