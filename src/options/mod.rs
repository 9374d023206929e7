//! Options-side logic: chain analysis, theta projection, and strike
//! selection. Pure over chain snapshots; the gateway owns fetching.

pub mod chain;
pub mod strike;
pub mod theta;
