pub mod circuit_breaker;
pub mod database;
pub mod directory;
pub mod fcm;
pub mod health;
pub mod rbmq;
pub mod redis;
pub mod store;
