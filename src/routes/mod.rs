pub mod events;
pub mod health;
pub mod notifications;
pub mod sweeps;
