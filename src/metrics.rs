//! Metric names for the transfer engine.
//!
//! The engine only emits through the `metrics` macros; without a recorder
//! installed every emission is a no-op.  Embedders that want scraping
//! install their own recorder and call [`describe_metrics`] once.

use metrics::{describe_counter, describe_histogram};

// -- Metric name constants ----------------------------------------------------

/// Total Put operations started (counter). Labels: mode (single|multi).
pub const PUT_TOTAL: &str = "partstream_put_total";

/// Total Get operations started (counter). Labels: mode (single|multi).
pub const GET_TOTAL: &str = "partstream_get_total";

/// Total List operations started (counter).
pub const LIST_TOTAL: &str = "partstream_list_total";

/// Total Delete operations started (counter).
pub const DELETE_TOTAL: &str = "partstream_delete_total";

/// Total part-level sub-operations issued (counter). Labels: op.
pub const PARTS_TOTAL: &str = "partstream_parts_total";

/// Bytes moved per transfer (histogram). Labels: op.
pub const TRANSFER_BYTES: &str = "partstream_transfer_bytes";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(PUT_TOTAL, "Total Put operations started");
    describe_counter!(GET_TOTAL, "Total Get operations started");
    describe_counter!(LIST_TOTAL, "Total List operations started");
    describe_counter!(DELETE_TOTAL, "Total Delete operations started");
    describe_counter!(PARTS_TOTAL, "Total part-level sub-operations issued");
    describe_histogram!(TRANSFER_BYTES, "Bytes moved per transfer");
}
