// Automatically generated mod.rs
pub mod multicast;
