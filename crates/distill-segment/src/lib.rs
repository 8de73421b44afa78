//! Projects analysis segments back onto the raw transcript body by
//! inserting `## [TYPE] title` marker lines before the line where each
//! segment's anchor quote starts.

pub mod normalize;
pub mod projection;

pub use normalize::{strip_timestamps, NormalizedBody};
pub use projection::{marker_line, project, MatchKind, Placement, Projection, ProjectionConfig};
