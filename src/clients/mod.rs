pub mod health;
pub mod redis;
pub mod relay;
pub mod template;
pub mod user;
