pub mod dev;
pub mod public;
pub mod webhooks;
