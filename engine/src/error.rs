use thiserror::Error;
use zonemap_shared::{RequestToken, UnitId, ZoneId};

/// Synchronous failures of the assignment store and the facade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error("map has no child layer; units cannot be shattered")]
    NoChildLayer,
    #[error("unit {0} is already shattered")]
    AlreadyShattered(UnitId),
    #[error("unit {0} is not shattered")]
    NotShattered(UnitId),
    #[error("unit {0} has no children in the child layer")]
    UnknownParent(UnitId),
    /// Heal refused because the children disagree. Nothing was changed.
    #[error("children of {parent} hold {} distinct zone values", zones.len())]
    Heterogeneous {
        parent: UnitId,
        zones: Vec<Option<ZoneId>>,
    },
    #[error("malformed import: {0}")]
    MalformedImport(String),
}

/// Failures delivered through the geometry worker's response channel.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GeometryError {
    /// A newer request of the same kind was issued; this answer is discarded.
    #[error("response {token} superseded by {latest}")]
    StaleResponse {
        token: RequestToken,
        latest: RequestToken,
    },
    #[error("geometry worker is not running")]
    WorkerGone,
    #[error("unexpected reply to {0}")]
    UnexpectedReply(String),
}

/// Failures talking to the remote document store.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote store timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("remote store request failed: {0}")]
    Transport(String),
    #[error("remote store payload could not be decoded: {0}")]
    Decode(String),
}
