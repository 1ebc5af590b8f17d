//! The identity record a node publishes to the store.

use serde::{Deserialize, Serialize};

/// Identity of a single announced node.
///
/// The record is serialized to JSON and stored under
/// `{cluster_prefix}/announcements/{key}`. The key is the store key's final
/// path segment and is never part of the payload; a watcher fills it back in
/// from the key the store reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announcement {
    /// Name of the node, unique within the cluster namespace. Uniqueness is
    /// the caller's responsibility; a duplicate key overwrites the previous
    /// announcement.
    #[serde(skip)]
    pub key: String,

    /// IP address the node is reachable on.
    pub ip: String,

    /// Port of the node's client-facing service.
    pub service_port: u16,

    /// Port other nodes use to join the cluster mesh.
    pub mesh_port: u16,
}
