// scout-common: shared rows, status machine and wire types for the scout workspace

pub mod protocol;
pub mod solution;
pub mod types;
