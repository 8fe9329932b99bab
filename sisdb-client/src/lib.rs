//! Data service boundary for SisDb.
//!
//! SisDb never talks to the network itself. Everything it needs from the
//! backing data service is expressed by the traits in this crate:
//! - [`SchemaService`]: list, create, update and delete schema descriptors
//! - [`DataEndpoint`]: per-schema CRUD, bulk delete and listing
//! - [`SisClient`]: the handle tying both together, plus the API version
//!
//! The [`memory`] module provides an in-process implementation of the whole
//! contract, used by the test suites and for offline work.

mod endpoint;
mod error;
pub mod memory;
mod schema;

pub use endpoint::{
    BulkDeleteResponse, CreateResponse, DataEndpoint, Page, PageMeta, QueryParams, Record, Records,
};
pub use error::{ClientError, ClientResult};
pub use schema::{SchemaDescriptor, SchemaService};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version of the data service API, e.g. `1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ApiVersion {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::Rejected(format!("invalid API version: {s}"));
        let (major, minor) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

/// A connected data service client.
pub trait SisClient {
    /// The API version spoken by the service.
    fn version(&self) -> ApiVersion;

    /// The schema service.
    fn schemas(&self) -> &dyn SchemaService;

    /// The data endpoint for records of the schema called `schema`.
    fn entities(&self, schema: &str) -> Box<dyn DataEndpoint>;
}
