//! Envelope of the geometry worker's message protocol.
//!
//! Requests travel as `{"op": ..., "payload": ..., "token": n}` and responses
//! as `{"token": n, "result": ...}` or `{"token": n, "error": ...}`. The
//! operation and reply types are defined by the engine; this module only fixes
//! the framing and the token discipline. Requests sent on a non-default lane
//! also carry `"lane": n`.

use serde::{Deserialize, Serialize};

/// Monotonically increasing request token. Responses are matched to requests
/// by token, never by arrival order.
pub type RequestToken = u64;

/// Supersession scope. A query only supersedes older queries of the same kind
/// issued on the same lane.
pub type Lane = u32;

fn is_default_lane(lane: &Lane) -> bool {
    *lane == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest<Op> {
    /// Adjacently tagged operation: contributes the `op` and `payload` keys.
    #[serde(flatten)]
    pub op: Op,
    pub token: RequestToken,
    #[serde(default, skip_serializing_if = "is_default_lane")]
    pub lane: Lane,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse<R, E> {
    pub token: RequestToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<E>,
}

impl<R, E> WorkerResponse<R, E> {
    pub fn ok(token: RequestToken, result: R) -> Self {
        Self {
            token,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(token: RequestToken, error: E) -> Self {
        Self {
            token,
            result: None,
            error: Some(error),
        }
    }

    /// Collapses the wire shape into a `Result`. A response carrying neither
    /// field is treated as an error produced by `missing`.
    pub fn into_result(self, missing: impl FnOnce() -> E) -> Result<R, E> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Err(missing()),
        }
    }
}
