pub mod config;
pub mod conversations;
pub mod documents;
pub mod health;
pub mod messages;
