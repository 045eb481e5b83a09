pub mod config;
pub mod controller;
pub mod device;
pub mod dispatch;
pub mod driver;
pub mod logging;
pub mod protocol;
pub mod scheduler;
pub mod thermostat;
