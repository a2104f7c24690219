//! Library inventory application: configuration, services, and the
//! interactive menu.

pub mod backend;
pub mod config;
pub mod menu;
pub mod services;
