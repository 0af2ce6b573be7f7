//! Domain layer: buffer layouts and the simulated keyboard.

pub mod keymap;
pub mod macros;
pub mod virtual_device;
