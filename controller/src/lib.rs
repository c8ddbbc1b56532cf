//! Qontroller Library
//!
//! Control plane for a fleet of headless capture devices reached over SSH.

pub mod capture;
pub mod device;
pub mod diagnostics;
pub mod errors;
pub mod filesys;
pub mod fleet;
pub mod installer;
pub mod logs;
pub mod mock;
pub mod remote;
pub mod storage;
pub mod utils;
