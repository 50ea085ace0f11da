//! Container data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::new_etag;
use crate::lease::Lease;

/// Public access level for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PublicAccessLevel {
    #[default]
    None,
    Container,
    Blob,
}

impl PublicAccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicAccessLevel::None => "",
            PublicAccessLevel::Container => "container",
            PublicAccessLevel::Blob => "blob",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "" | "none" | "private" => Some(PublicAccessLevel::None),
            "container" => Some(PublicAccessLevel::Container),
            "blob" => Some(PublicAccessLevel::Blob),
            _ => None,
        }
    }
}

/// Container properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerProperties {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub public_access: PublicAccessLevel,
}

impl ContainerProperties {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            etag: new_etag(),
            last_modified: now,
            public_access: PublicAccessLevel::None,
        }
    }

    /// Regenerates the ETag and bumps the last modified time.
    pub fn update_etag(&mut self, now: DateTime<Utc>) {
        self.etag = new_etag();
        self.last_modified = now;
    }
}

/// Signed identifier for container access policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedIdentifier {
    pub id: String,
    pub access_policy: AccessPolicy,
}

/// Access policy for a signed identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub start: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
    pub permission: String,
}

/// Complete container model stored in the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerModel {
    /// Account name.
    pub account: String,
    /// Container name.
    pub name: String,
    /// Container properties.
    pub properties: ContainerProperties,
    /// Lease record.
    pub lease: Lease,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
    /// Signed identifiers for stored access policies.
    pub signed_identifiers: Vec<SignedIdentifier>,
}

impl ContainerModel {
    /// Creates a new container model.
    pub fn new(account: String, name: String, now: DateTime<Utc>) -> Self {
        Self {
            account,
            name,
            properties: ContainerProperties::new(now),
            lease: Lease::Available,
            metadata: HashMap::new(),
            signed_identifiers: Vec::new(),
        }
    }
}
