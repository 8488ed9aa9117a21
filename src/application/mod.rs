//! Application services: interception, rendering and comment presentation.

pub mod comment;
pub mod error;
pub mod interceptor;
pub mod render;
pub mod thread;
