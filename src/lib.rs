#![forbid(unsafe_code)]

pub mod activity;
pub mod background;
pub mod capture;
pub mod cli;
pub mod detection;
pub mod duplicates;
pub mod event_log;
pub mod logging;
pub mod mealie;
pub mod menu;
pub mod settings;
pub mod storage;
pub mod surface;
