//! Watermark bookkeeping
//!
//! - [`watermark`] - the watermark value and its wire format
//! - [`store`] - `last_updated.json` persistence with monotonic advance

pub mod store;
pub mod watermark;

pub use store::{WatermarkStore, WATERMARK_FILE};
pub use watermark::Watermark;
