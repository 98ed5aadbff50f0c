pub mod policy;
pub mod registry;
pub mod simulator;
pub mod tracker;
