//! Mining engine for the blockchain
//!
//! A single worker thread searches nonces for the latest candidate block.
//! Submitting a candidate cancels the search in progress and starts over on
//! the new one; a found block is signed and handed back to the consensus
//! loop.

use crate::core::{unix_timestamp, Block};
use crate::crypto::{check_proof_of_work, KeyPair};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

impl MiningStats {
    fn new(hash_attempts: u64, started: Instant) -> Self {
        let time_ms = started.elapsed().as_millis();
        let hash_rate = if time_ms > 0 {
            (hash_attempts as f64) / (time_ms as f64 / 1000.0)
        } else {
            hash_attempts as f64
        };
        Self {
            hash_attempts,
            time_ms,
            hash_rate,
        }
    }
}

struct MiningJob {
    candidate: Block,
    cancel: CancellationToken,
}

/// Handle used by the consensus loop to feed the miner
pub struct MinerHandle {
    jobs: mpsc::UnboundedSender<MiningJob>,
    in_flight: Option<CancellationToken>,
}

impl MinerHandle {
    /// Replace whatever the miner is working on with `candidate`
    pub fn submit(&mut self, candidate: Block) {
        if let Some(previous) = self.in_flight.take() {
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        let job = MiningJob {
            candidate,
            cancel: cancel.clone(),
        };
        if self.jobs.send(job).is_err() {
            warn!("Miner thread has stopped; candidate dropped");
            return;
        }
        self.in_flight = Some(cancel);
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        if let Some(job) = self.in_flight.take() {
            job.cancel();
        }
    }
}

/// Start the miner thread.
///
/// Found blocks are sent on `found` with a blocking send, so a busy
/// consensus loop holds the miner back rather than losing blocks.
pub fn spawn(
    keypair: Arc<KeyPair>,
    pow_prefix: Vec<u8>,
    found: mpsc::Sender<Block>,
) -> io::Result<MinerHandle> {
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let worker = Miner {
        keypair,
        pow_prefix,
        jobs: jobs_rx,
        found,
    };

    thread::Builder::new()
        .name("miner".to_string())
        .spawn(move || worker.run())?;

    Ok(MinerHandle {
        jobs: jobs_tx,
        in_flight: None,
    })
}

/// The worker side, owned by the miner thread
struct Miner {
    keypair: Arc<KeyPair>,
    pow_prefix: Vec<u8>,
    jobs: mpsc::UnboundedReceiver<MiningJob>,
    found: mpsc::Sender<Block>,
}

impl Miner {
    fn run(mut self) {
        while let Some(mut job) = self.jobs.blocking_recv() {
            // Only the newest candidate matters
            while let Ok(newer) = self.jobs.try_recv() {
                job = newer;
            }

            if job.candidate.transactions.is_empty() {
                debug!("Candidate has no transactions; miner idle");
                continue;
            }

            let Some((block, stats)) = mine_candidate(
                job.candidate,
                &self.pow_prefix,
                &self.keypair,
                &job.cancel,
            ) else {
                continue;
            };

            info!(
                "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
                block.hash_hex(),
                stats.time_ms,
                stats.hash_attempts,
                stats.hash_rate
            );

            if self.found.blocking_send(block).is_err() {
                break;
            }
        }
        debug!("Miner thread exiting");
    }
}

/// Search nonces for `candidate` until the proof of work holds or `cancel`
/// fires, then sign the block.
pub fn mine_candidate(
    mut candidate: Block,
    pow_prefix: &[u8],
    keypair: &KeyPair,
    cancel: &CancellationToken,
) -> Option<(Block, MiningStats)> {
    let started = Instant::now();
    let mut attempts: u64 = 0;

    candidate.header.nonce = 0;
    candidate.update_merkle_root();
    candidate.header.timestamp = unix_timestamp();

    loop {
        if cancel.is_cancelled() {
            debug!("Mining cancelled after {} attempts", attempts);
            return None;
        }

        attempts += 1;
        if check_proof_of_work(pow_prefix, &candidate.hash()) {
            break;
        }

        candidate.header.nonce = candidate.header.nonce.wrapping_add(1);
        if candidate.header.nonce == 0 {
            candidate.header.timestamp = unix_timestamp();
        }
    }

    if let Err(e) = candidate.sign(keypair) {
        warn!("Failed to sign mined block: {}", e);
        return None;
    }

    Some((candidate, MiningStats::new(attempts, started)))
}
