//! Data models for Parla

mod lang;
mod message;
mod room;

pub use lang::*;
pub use message::*;
pub use room::*;
