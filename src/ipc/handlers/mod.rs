pub mod candidates;
pub mod codes;
pub mod core;
pub mod corrections;
pub mod correctors;
pub mod reports;
pub mod results;
pub mod rules;
pub mod setup;
pub mod submissions;
