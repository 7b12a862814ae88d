//! JSONL activity logging with rotation and graceful degradation.

pub mod activity;
pub mod jsonl;
