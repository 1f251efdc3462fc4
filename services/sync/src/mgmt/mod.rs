pub mod client;
pub mod models;

use async_trait::async_trait;

pub use client::{MgmtClient, MgmtClientConfig, MgmtClientError};
use models::{Connection, Customer, SyncConfig};

/// Read side of the management API used by schedule discovery.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn list_customers(&self) -> Result<Vec<Customer>, MgmtClientError>;

    async fn list_connections(&self, customer_id: &str)
        -> Result<Vec<Connection>, MgmtClientError>;

    async fn list_sync_configs(&self) -> Result<Vec<SyncConfig>, MgmtClientError>;
}
