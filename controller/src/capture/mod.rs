//! Capture program configuration

pub mod config;
