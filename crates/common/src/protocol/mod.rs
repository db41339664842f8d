pub mod actions;
pub mod realtime;
pub mod rpc;
