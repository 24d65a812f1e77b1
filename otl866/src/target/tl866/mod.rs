//! TL866A/CS mode orchestration.

mod flasher;

pub use flasher::{Tl866Flasher, UpdateOptions};
