//! The pluggable inventory provider seam.

use async_trait::async_trait;
use serde_json::Value;

/// External device inventories (e.g. a mesh coordinator sync) implement
/// this; the gateway falls back to its own probe registry otherwise.
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Devices known to the provider.
    async fn devices(&self) -> Vec<Value>;

    /// Provider sync metadata, shown verbatim under `sync`.
    async fn inventory_status(&self) -> Value;
}
