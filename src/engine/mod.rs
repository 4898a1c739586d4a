//! Location tracking engine
//!
//! Raw readings go through [`filter::filter`], are blended by
//! [`smoothing::smooth`], and [`gate::should_persist_now`] decides whether
//! they are written right away or left to the session heartbeat.

pub mod filter;
pub mod gate;
pub mod geometry;
pub mod sample;
pub mod session;
pub mod smoothing;
