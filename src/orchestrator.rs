//! The download orchestrator: tracker announce, peer connection, and the
//! round loop that drives the block plan to completion.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rand::seq::IteratorRandom;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::assembler::{Assembler, AssemblerError};
use crate::block::{Block, BlockPlan};
use crate::peer::PeerSession;
use crate::progress::ProgressSink;
use crate::torrent::metainfo::Torrent;
use crate::tracker::{Client as TrackerClient, TrackerError};

/// Advertised to the tracker; no inbound listener is actually opened
/// (leech-only).
const LISTEN_PORT: u16 = 59696;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("tracker announce failed: {0}")]
    Tracker(#[from] TrackerError),

    #[error("failed to save downloaded output: {0}")]
    Save(#[from] AssemblerError),

    #[error("download stalled: {remaining} block(s) pending but no connected peer can supply them")]
    Stalled { remaining: usize },
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Drives a single torrent to completion against its tracker and peers.
pub struct Orchestrator<'a> {
    torrent: &'a Torrent,
    output_dir: PathBuf,
    progress: Arc<dyn ProgressSink>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(torrent: &'a Torrent, output_dir: PathBuf, progress: Arc<dyn ProgressSink>) -> Self {
        Orchestrator { torrent, output_dir, progress }
    }

    /// Announce, connect to peers, then run rounds until the block plan is
    /// drained, saving the assembled payload on completion.
    #[instrument(skip(self), fields(torrent = self.torrent.layout.name()))]
    pub async fn run(&self) -> OrchestratorResult<()> {
        let tracker = TrackerClient::new(self.torrent.peer_id, LISTEN_PORT);
        let announce = tracker.announce(self.torrent, 0).await?;
        info!(
            peer_count = announce.peers.len(),
            interval = announce.interval,
            "tracker announce complete"
        );

        let mut sessions = self.connect_peers(&announce.peers).await;
        info!(connected = sessions.len(), "peer sessions established");
        self.prime_availability(&mut sessions).await;

        self.download_with_sessions(sessions).await
    }

    /// The round loop proper, over an already-connected, already-primed
    /// set of sessions. Split out from [`Orchestrator::run`] so the tracker
    /// and connection phases can be substituted with a hermetic peer in
    /// tests.
    async fn download_with_sessions(&self, mut sessions: Vec<PeerSession>) -> OrchestratorResult<()> {
        let mut plan = BlockPlan::for_layout(self.torrent.total_length(), self.torrent.piece_length);
        let total_blocks = plan.len().max(1);
        let mut assembler = Assembler::new(self.torrent);
        let mut downloaded_count: usize = 0;

        while !plan.is_empty() || !assembler.is_complete() {
            if sessions.is_empty() {
                return Err(OrchestratorError::Stalled { remaining: plan.len() });
            }

            let (round_blocks, leftover) = assign_round(&mut plan, &sessions);
            plan = leftover;

            if round_blocks.is_empty() {
                // Every pending block's piece is unavailable from every
                // connected peer this round; nothing to dispatch, and
                // nothing will change on a later round either.
                return Err(OrchestratorError::Stalled { remaining: plan.len() });
            }

            let results = dispatch_round(&mut sessions, round_blocks).await;
            for (block, outcome) in results {
                match outcome {
                    Some(data) => {
                        assembler.add(block, data);
                        downloaded_count += 1;
                        let value = ((100 * downloaded_count) / total_blocks).min(100) as u8;
                        self.progress.update(value);
                    }
                    None => plan.add(block),
                }
            }

            plan.extend(assembler.get_failed());
        }

        assembler.save(&self.output_dir)?;
        self.progress.update(100);
        Ok(())
    }

    async fn connect_peers(&self, peers: &[crate::tracker::Peer]) -> Vec<PeerSession> {
        let mut futures = FuturesUnordered::new();
        for peer in peers {
            let addr = SocketAddr::new(peer.ip, peer.port);
            let info_hash = self.torrent.info_hash;
            let peer_id = self.torrent.peer_id;
            futures.push(async move { PeerSession::connect(addr, info_hash, peer_id).await });
        }

        let mut sessions = Vec::new();
        while let Some(result) = futures.next().await {
            match result {
                Ok(session) => sessions.push(session),
                Err(err) => debug!(%err, "discarding peer: handshake or connect failed"),
            }
        }
        sessions
    }

    /// Drain one receive-round per session so bitfield/have advertisements
    /// sent right after the handshake are recorded before scheduling.
    async fn prime_availability(&self, sessions: &mut [PeerSession]) {
        let mut refs: Vec<Option<&mut PeerSession>> = sessions.iter_mut().map(Some).collect();
        let mut futures = FuturesUnordered::new();
        for slot in refs.iter_mut() {
            let session = slot.take().expect("each session visited once");
            futures.push(async move { session.receive_next_batch().await });
        }
        while let Some(result) = futures.next().await {
            if let Err(err) = result {
                debug!(%err, "error priming peer availability");
            }
        }
    }
}

/// Assign at most one block per session per round: a block goes to one
/// peer chosen uniformly at random among sessions that (i) advertise its
/// piece and (ii) haven't already been assigned a block this round.
/// Unassignable blocks are returned in a fresh plan to re-add.
fn assign_round(plan: &mut BlockPlan, sessions: &[PeerSession]) -> (Vec<(usize, Block)>, BlockPlan) {
    let mut scheduled_sessions = vec![false; sessions.len()];
    let mut round_blocks = Vec::new();
    let mut deferred = BlockPlan::default();
    let mut rng = rand::rng();

    while let Some(block) = plan.next() {
        let candidate = sessions
            .iter()
            .enumerate()
            .filter(|(idx, session)| !scheduled_sessions[*idx] && session.has_piece(block.index))
            .choose(&mut rng);

        match candidate {
            Some((idx, _)) => {
                scheduled_sessions[idx] = true;
                round_blocks.push((idx, block));
            }
            None => deferred.add(block),
        }
    }

    (round_blocks, deferred)
}

/// Dispatch every assigned `(session index, block)` pair concurrently and
/// collect results as they complete.
async fn dispatch_round(
    sessions: &mut [PeerSession],
    round_blocks: Vec<(usize, Block)>,
) -> Vec<(Block, Option<Vec<u8>>)> {
    let mut refs: Vec<Option<&mut PeerSession>> = sessions.iter_mut().map(Some).collect();
    let mut futures = FuturesUnordered::new();

    for (idx, block) in round_blocks {
        let session = refs[idx].take().expect("at most one block assigned per session per round");
        futures.push(async move {
            let data = session.request(block).await;
            (block, data)
        });
    }

    let mut results = Vec::new();
    while let Some(result) = futures.next().await {
        results.push(result);
    }
    results
}
