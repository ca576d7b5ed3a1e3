pub mod app;
pub mod backend;
pub mod calculator;
pub mod config;
pub mod conversation;
pub mod error;
pub mod format;
pub mod inbox;
pub mod local_store;
pub mod messenger;
pub mod models;
pub mod passcode;
pub mod profile;
pub mod realtime;
pub mod stories;
pub mod tenor;
pub mod typing;
