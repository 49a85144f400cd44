//! Wire payload for listcast streams
//!
//! Every data frame a session sends is one serialized collection:
//! - `type`: always `"collection"`
//! - `resourceType`: the kind of resource listed (omitted on the sentinel)
//! - `data`: the full current list
//!
//! A "no change" cycle is answered with the sentinel collection, which is
//! well formed but carries neither a resource type nor any data.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Interval between liveness pings (and the starvation resend cadence)
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Deadline applied to every outbound frame write
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a client-requested update period
pub const MAX_UPDATE_PERIOD: Duration = Duration::from_secs(15);

/// Value of the `type` field on every collection
pub const COLLECTION_TYPE: &str = "collection";

fn collection_type() -> String {
    COLLECTION_TYPE.to_string()
}

/// A full listing of one resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection<T> {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Collection<T> {
    /// Create a collection of `resource_type` holding `data`
    pub fn new(resource_type: impl Into<String>, data: Vec<T>) -> Self {
        Collection {
            kind: collection_type(),
            resource_type: resource_type.into(),
            data,
        }
    }

    /// Create the "nothing changed" sentinel
    pub fn empty() -> Self {
        Collection {
            kind: collection_type(),
            resource_type: String::new(),
            data: Vec::new(),
        }
    }

    /// True for the sentinel produced by [`Collection::empty`]
    ///
    /// A genuine listing with zero items still names its resource type and
    /// is not a sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.resource_type.is_empty() && self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
