mod display;
mod service;

pub use display::DisplayItem;
pub use service::{Diagnostic, ReaderService};
