#![doc = include_str!("../README.md")]
pub mod configuration;
pub mod correction;
pub mod driver;
pub mod error;
pub mod light_sensor;
pub mod localisation;
pub mod logging;
pub mod odometer;
