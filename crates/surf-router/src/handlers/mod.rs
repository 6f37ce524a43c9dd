//! Tool handler groups, one module per family in the dispatch table.

pub mod input;
pub mod inspect;
pub mod misc;
pub mod nav;
pub mod net;
pub mod shots;
pub mod tabs;
pub mod wait;
