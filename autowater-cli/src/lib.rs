//! Settings and session wiring for the `autowater` command line tool.

mod session;
mod settings;

pub use session::{render_status, Faults, Session};
pub use settings::{PlantSettings, Settings};
