pub mod cache;
pub mod commands;
pub mod config;
pub mod data_context;
pub mod engine;
pub mod error;
pub mod forecast_client;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod policy;
pub mod processor;
pub mod search_space;
pub mod signals;
pub mod strategy;
