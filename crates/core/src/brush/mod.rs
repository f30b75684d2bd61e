//! Brush tasks: farm a site's feed for upload credit.
//!
//! [`BrushAcquisitionLoop`] adds feed items a task's acquisition rule
//! accepts, bounded by volume and concurrency ceilings.
//! [`BrushLifecycleLoop`] deletes the task's torrents once its removal rule
//! says they are done and forgets those removed behind its back.

mod acquisition;
mod lifecycle;
mod removal;
mod types;

pub use acquisition::{BrushAcquisitionLoop, ORGANIZED_TAG};
pub use lifecycle::BrushLifecycleLoop;
pub use removal::{Cohort, RemovalPolicy, TorrentMetrics};
pub use types::*;
