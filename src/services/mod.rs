pub mod dedup;
pub mod direct;
pub mod dispatcher;
pub mod rearm;
pub mod sweeper;
