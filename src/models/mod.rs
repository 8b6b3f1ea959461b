pub mod circuit_breaker;
pub mod directory;
pub mod error;
pub mod fcm;
pub mod health;
pub mod message;
pub mod push;
pub mod record;
pub mod response;
pub mod retry;
pub mod status;
pub mod validation;
