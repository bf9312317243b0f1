pub mod config;
pub mod coordinator;
pub mod link;
pub mod messages;
pub mod navcon;
pub mod nodes;
pub mod runtime;
pub mod scs;
