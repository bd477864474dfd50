//! News ingestion and enrichment pipeline.
//!
//! Feeds are polled on a tiered schedule, new items become article rows,
//! and each article's text is resolved (plain fetch, then headless render)
//! and classified by an LLM. Both stages run as durable step-logged
//! workflows so an interrupted run resumes without repeating finished work.

pub mod api;
pub mod classify;
pub mod config;
pub mod content;
pub mod feed;
pub mod http;
pub mod ratelimit;
pub mod storage;
pub mod util;
pub mod workflow;
