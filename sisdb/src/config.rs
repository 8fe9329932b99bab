use serde::{Deserialize, Serialize};
use sisdb_client::ApiVersion;

/// Slice size served by `Query::page` when no limit is set.
pub const DEFAULT_PAGE_WINDOW: usize = 200;

/// Configuration for a [`SisDb`](crate::SisDb) registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SisDbConfig {
    /// Oldest data service API version accepted by `connect`.
    pub min_api_version: ApiVersion,
    /// Window used by `Query::page` when no limit is set.
    pub page_window: usize,
    /// Pull the schema list as part of `connect`.
    pub refresh_on_connect: bool,
}

impl Default for SisDbConfig {
    fn default() -> Self {
        Self {
            min_api_version: ApiVersion::new(1, 1),
            page_window: DEFAULT_PAGE_WINDOW,
            refresh_on_connect: true,
        }
    }
}
