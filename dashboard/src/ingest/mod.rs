pub mod http_source;

use crate::model::{PageBody, Query};
use async_trait::async_trait;
use trends_core::Result;

#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page of the query. Status >= 400 is an error; 204 is
    /// [`PageBody::NoContent`].
    async fn fetch_page(&self, query: &Query, page: u32) -> Result<PageBody>;

    /// Get the source identifier
    fn source_id(&self) -> &str;
}

pub use http_source::HttpSource;
