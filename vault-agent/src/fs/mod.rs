//! File system access: directory walking and content hashing.

pub mod hasher;
pub mod walker;
