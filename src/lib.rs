// ABOUTME: Library root for skiff - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod error;
pub mod input;
pub mod menu;
pub mod session;
pub mod trust;
