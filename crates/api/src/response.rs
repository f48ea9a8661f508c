//! Shared response envelope types for API handlers.
//!
//! Collection and admin endpoints use a `{ "data": ... }` envelope. The
//! upload and status endpoints return their payload unwrapped, matching the
//! shape the upload client polls for.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
///
/// ```ignore
/// Ok(Json(DataResponse { data: items }))
/// ```
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
