pub mod auth;
pub mod gateway;
pub mod notifications;
pub mod sandbox;
pub mod stripe;
pub mod workflow;
