//! Map buttons and absolute axes of evdev devices to synthesized key presses
//! and shell commands.

pub mod config;
pub mod context;
pub mod control;
pub mod delayed;
pub mod device;
pub mod dispatch;
pub mod multiplexer;
pub mod output;
pub mod source;
