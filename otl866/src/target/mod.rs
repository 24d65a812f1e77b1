//! TL866 device operations built on the protocol layers.

pub mod layout;
pub mod tl866;

pub use {
    layout::FlashLayout,
    tl866::{Tl866Flasher, UpdateOptions},
};
