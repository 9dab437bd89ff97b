pub mod bus;
pub mod config;
pub mod device;
pub mod ws;
