//! Route handlers

pub mod health;
pub mod process_image;
