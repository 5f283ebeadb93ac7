#![forbid(unsafe_code)]

pub mod access;
pub mod app;
pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod formats;
pub mod logging;
