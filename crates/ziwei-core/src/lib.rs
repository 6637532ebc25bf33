pub mod errors;
pub mod events;
pub mod generation;
pub mod ids;
pub mod messages;
pub mod tools;
