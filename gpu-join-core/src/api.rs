//! Status-returning join interface.
//!
//! Mirrors the C-style surface of the engine: every call yields a
//! [`JoinStatus`], and a result handle exists only on success.

use gpu_memory_manager::DevicePtr;
use tracing::warn;

use crate::column::Column;
use crate::join_kind::JoinKind;
use crate::result::JoinResult;
use crate::status::JoinStatus;
use crate::JoinEngine;

/// Join with the kind given as its integer code (0 INNER, 1 LEFT, 2 OUTER).
pub fn join(
    engine: &JoinEngine,
    kind: i32,
    left: &[Column<'_>],
    right: &[Column<'_>],
) -> (JoinStatus, Option<JoinResult>) {
    let outcome = JoinKind::try_from(kind).and_then(|kind| engine.join(kind, left, right));
    match outcome {
        Ok(result) => (JoinStatus::Success, Some(result)),
        Err(err) => {
            let status = err.status();
            warn!("Join failed with {}: {}", status, err);
            (status, None)
        }
    }
}

/// Element count of the flat pair buffer.
pub fn result_size(result: &JoinResult) -> usize {
    result.size()
}

pub fn result_data(result: &JoinResult) -> DevicePtr {
    result.data()
}

/// Free the result's device buffer. Consumes the handle.
pub fn result_free(result: JoinResult) {
    result.release()
}
