pub mod error;
pub mod health;
pub mod quota;
pub mod tasks;
