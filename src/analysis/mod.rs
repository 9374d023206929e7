//! Market-structure analysis: volume profile, order blocks, fair value gaps,
//! confluence scoring, and zone assembly. Pure functions over candle windows;
//! no I/O.

pub mod confluence;
pub mod fvg;
pub mod order_blocks;
pub mod volume_profile;
pub mod zones;
