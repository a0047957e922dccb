//! Fetcher seam - the network collaborator that retrieves one unit at a time.
//!
//! The manager never talks to the network itself. The host application supplies an
//! implementation (typically wrapping its HTTP client and image writer) and the
//! manager drives it from many runners at once, so implementations must be safe
//! for concurrent independent calls.

use crate::error::FetchError;
use crate::types::{TaskKey, UnitDescriptor};

/// Successful fetch of one unit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Fetched {
    /// Bytes received (or confirmed written) for the unit
    pub bytes: u64,
}

impl Fetched {
    /// Successful fetch of `bytes` bytes
    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }
}

/// Abstraction over unit fetching, enabling testability.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch one unit of `task`
    ///
    /// Implementations classify their own failures into [`FetchError`] variants;
    /// the classification decides whether the unit is retried.
    async fn fetch(
        &self,
        task: &TaskKey,
        unit: &UnitDescriptor,
    ) -> std::result::Result<Fetched, FetchError>;
}
