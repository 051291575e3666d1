pub mod controller;
pub mod events;

pub use controller::TrackerController;
pub use events::{ActivityEvent, IdleState, TabContext};
