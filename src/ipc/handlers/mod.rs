pub mod achievements;
pub mod core;
pub mod grades;
pub mod setup;
