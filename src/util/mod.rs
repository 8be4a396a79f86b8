//! Text helpers shared by the parsers and the plain-text listing.

mod text;

pub use text::{display_width, fit_column, strip_control_chars, truncate_to_width};
