//! Mining module: the preemptible proof-of-work worker

pub mod miner;

pub use miner::{mine_candidate, spawn, MinerHandle, MiningStats};
