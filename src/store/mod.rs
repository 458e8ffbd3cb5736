//! Persistence of seller metrics.
//!
//! - `http`: the remote backend (`/api/sellers/{store}/{seller}`).
//! - `sqlite`: a local keyed store with the same contract.
//!
//! Both overwrite the stored metrics on every save (last write wins).

use crate::error::PersistError;
use crate::model::Metrics;
use async_trait::async_trait;

pub mod http;
pub mod sqlite;

pub use http::HttpMetricsStore;
pub use sqlite::SqliteMetricsStore;

#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Replace the stored metrics of `(store_id, seller_id)`.
    async fn save(
        &self,
        store_id: &str,
        seller_id: &str,
        metrics: &Metrics,
    ) -> Result<(), PersistError>;

    /// Read back the stored metrics, `None` if nothing was ever saved.
    async fn load(&self, store_id: &str, seller_id: &str)
        -> Result<Option<Metrics>, PersistError>;
}
