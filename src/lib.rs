// src/lib.rs

pub mod api;
pub mod app_state;
pub mod catalog;
pub mod config;
pub mod error;
pub mod media;
pub mod service;
pub mod storage;
