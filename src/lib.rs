//! Feed acquisition and normalization pipeline for a personal RSS/Atom
//! aggregator: fetch, parse, normalize and persist subscribed feeds on a
//! schedule.

pub mod config;
pub mod feed;
pub mod shutdown;
pub mod storage;
pub mod util;
