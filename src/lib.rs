pub mod calendar;
pub mod config;
pub mod db;
pub mod export;
pub mod model;
pub mod outbox;
pub mod reconciler;
pub mod report;
pub mod schedule;
pub mod service;
pub mod stats;
