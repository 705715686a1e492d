// src/lib.rs

//! WebWatch monitoring engine
//!
//! Fetches monitored pages on cron schedules, detects content changes by
//! digest, keeps a short check history and alerts owners over Telegram and
//! email.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod services;
pub mod storage;
pub mod utils;
