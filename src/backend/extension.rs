//! Process-wide registration of the `sqlite-vec` ANN extension.

use std::sync::Once;

static REGISTER: Once = Once::new();

/// Register `sqlite-vec` as an auto-extension so every connection opened
/// afterwards (by any engine) can create and query `vec0` tables.
///
/// Idempotent. Must run before the first connection is opened.
pub fn register_vector_extension() {
    REGISTER.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the extension entry point exported by
        // the sqlite-vec crate; the transmute only adapts the fn pointer to
        // the FFI signature `sqlite3_auto_extension` declares.
        let rc = unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )))
        };
        if rc != rusqlite::ffi::SQLITE_OK {
            tracing::warn!(code = rc, "failed to register sqlite-vec; vector search disabled");
        } else {
            tracing::debug!("sqlite-vec registered");
        }
    });
}
