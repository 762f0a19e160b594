// src/utils/mod.rs
//! Utility helpers for resistivity-core

pub mod stats;
