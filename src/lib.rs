//! Comment rendering core for a wiki.
//!
//! Markdown comment bodies flow through a fixed sequence of interception
//! points and renderer transforms before the sanitised HTML is committed to a
//! display sink. See [`application::render::RenderPipeline`].

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
