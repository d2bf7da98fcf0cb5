pub mod events;
pub mod models;
pub mod roster;
pub mod runs;
