pub mod balance;
pub mod balancer;
pub mod clock;
pub mod compute;
pub mod config;
pub mod error;
pub mod protocol;
pub mod service;
pub mod source;
pub mod stats;
