pub mod backoff;
pub mod error;
pub mod health;
pub mod state;
pub mod worker;

pub use worker::Supervisor;
