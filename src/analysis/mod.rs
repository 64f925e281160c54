pub mod marker;
pub mod stats;
pub mod text;

pub use marker::{ScanBounds, find_label, find_total_marker};
pub use stats::{StatStrategy, StatsContext, StatsRegistry};
pub use text::{LabelSet, normalize};
