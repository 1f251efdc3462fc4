use futures::future::try_join_all;
use unisync_common::types::{SyncTrigger, Vertical};

use crate::mgmt::models::{Connection, SyncConfig};
use crate::mgmt::{ManagementApi, MgmtClientError};

/// One trigger per connection whose category is a supported vertical.
pub async fn discover_triggers(
    api: &dyn ManagementApi,
) -> Result<Vec<SyncTrigger>, MgmtClientError> {
    let (sync_configs, customers) =
        tokio::try_join!(api.list_sync_configs(), api.list_customers())?;

    let connections: Vec<Connection> = try_join_all(
        customers
            .iter()
            .map(|c| api.list_connections(&c.customer_id)),
    )
    .await?
    .into_iter()
    .flatten()
    .collect();

    let triggers: Vec<SyncTrigger> = connections
        .iter()
        .filter_map(|c| trigger_for(c, &sync_configs))
        .collect();

    tracing::info!(
        customers = customers.len(),
        connections = connections.len(),
        triggers = triggers.len(),
        "discovered sync triggers"
    );
    Ok(triggers)
}

fn trigger_for(connection: &Connection, sync_configs: &[SyncConfig]) -> Option<SyncTrigger> {
    let Some(vertical) = Vertical::from_category(&connection.category) else {
        tracing::debug!(
            customer_id = %connection.customer_id,
            provider_name = %connection.provider_name,
            category = %connection.category,
            "skipping connection with unsupported category"
        );
        return None;
    };

    let mut trigger = SyncTrigger::new(
        connection.customer_id.clone(),
        connection.provider_name.clone(),
        vertical,
    );
    if let Some(sc) = sync_configs
        .iter()
        .find(|sc| sc.provider_name == connection.provider_name)
    {
        trigger.common_objects = sc.common_objects();
        trigger.standard_objects = sc.standard_objects();
    }
    Some(trigger)
}
