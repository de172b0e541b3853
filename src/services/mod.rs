pub mod access;
pub mod subscriptions;
pub mod sweeper;
