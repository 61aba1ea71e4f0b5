pub mod commands;
pub mod events;
pub mod runs;
pub mod status;
pub mod topology;
