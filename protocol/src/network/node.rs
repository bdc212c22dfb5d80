//! # Replica Node
//!
//! The `Node` is the top-level runtime entity for a VERA replica. It owns
//! the block log (and through it the version store), the consensus
//! engine, the peer and validator tables, the seen-block cache, and the
//! injected incentive hook. The HTTP layer in the node binary is a thin
//! adapter over the methods here; everything that matters to the
//! protocol happens in this module.
//!
//! ## Locking discipline
//!
//! - One mutex around the block log linearizes chain appends and version
//!   store mutation. It is never held across an `.await`.
//! - Consensus state is per-height, behind the engine's own locks.
//! - Outbound messages are spawned fire-and-forget tasks with their own
//!   timeouts; the inbound path never waits on a peer.
//!
//! ## The incentive hook
//!
//! Every served read and every accepted write pays through
//! [`ServiceHook::pay_service`]. The hook may refuse (a frozen account),
//! which surfaces as an authorization failure to the caller. The
//! accounting itself lives outside this crate — the node only knows the
//! seam.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ads::merkle::ProofNode;
use crate::ads::store::AdsError;
use crate::config::VIEW_CHANGE_TIMEOUT;
use crate::crypto::keys::VeraKeypair;
use crate::network::consensus::{
    sign_new_view, sign_view_change, verify_committed_header, ConsensusEngine, ConsensusError,
    NewView, PhaseOutcome, PhaseVote, PrePrepare, ValidatorSet, ViewChange,
};
use crate::network::rpc::PeerTransport;
use crate::storage::block::{Block, BlockHeader, Operation};
use crate::storage::chain::{BlockError, BlockLog};

// ---------------------------------------------------------------------------
// Incentive Hook
// ---------------------------------------------------------------------------

/// Failure modes of the incentive hook.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The account is frozen pending an audit; the operation is refused.
    #[error("account {0} is frozen")]
    AccountFrozen(String),
}

/// The seam between the node and the accounting ledger. Called once per
/// served read and once per accepted write.
pub trait ServiceHook: Send + Sync {
    fn pay_service(&self, node_id: &str) -> Result<(), HookError>;
}

/// A hook that always says yes. Used by tests and by deployments that
/// run without the ledger.
pub struct FreeService;

impl ServiceHook for FreeService {
    fn pay_service(&self, _node_id: &str) -> Result<(), HookError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by node entry points. The HTTP layer maps these onto
/// status codes; none of them crash the replica.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Operation restricted to validator nodes.
    #[error("node {0} is not a validator")]
    NotValidator(String),

    #[error(transparent)]
    Ads(#[from] AdsError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Service(#[from] HookError),
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Construction parameters for a [`Node`].
pub struct NodeConfig {
    /// This replica's id (also its validator id, when it is one).
    pub id: String,
    /// Signing identity.
    pub keypair: VeraKeypair,
    /// Peer table: id → `host:port`. Should not contain this node.
    pub peers: BTreeMap<String, String>,
    /// The static validator membership.
    pub validators: ValidatorSet,
    /// Block log (and version store) this replica serves from.
    pub log: BlockLog,
    /// Outbound transport.
    pub transport: Arc<dyn PeerTransport>,
    /// Incentive hook.
    pub hook: Arc<dyn ServiceHook>,
}

/// A VERA replica.
pub struct Node {
    pub id: String,
    keypair: VeraKeypair,
    peers: BTreeMap<String, String>,
    log: Mutex<BlockLog>,
    engine: ConsensusEngine,
    /// Header hashes of blocks already applied; re-delivery is acked
    /// without re-execution.
    seen: DashMap<String, ()>,
    /// Pending view-change timers by height.
    timers: DashMap<i64, tokio::task::JoinHandle<()>>,
    transport: Arc<dyn PeerTransport>,
    hook: Arc<dyn ServiceHook>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Arc<Self> {
        info!(
            id = %config.id,
            peers = config.peers.len(),
            validators = config.validators.len(),
            quorum = config.validators.quorum(),
            "node created"
        );
        Arc::new(Self {
            engine: ConsensusEngine::new(config.id.clone(), config.validators),
            id: config.id,
            keypair: config.keypair,
            peers: config.peers,
            log: Mutex::new(config.log),
            seen: DashMap::new(),
            timers: DashMap::new(),
            transport: config.transport,
            hook: config.hook,
        })
    }

    /// The validator membership this node was configured with.
    pub fn validators(&self) -> &ValidatorSet {
        self.engine.validators()
    }

    /// Whether this node may propose and vote.
    pub fn is_validator(&self) -> bool {
        self.validators().contains(&self.id)
    }

    /// Peer table snapshot.
    pub fn peers(&self) -> &BTreeMap<String, String> {
        &self.peers
    }

    // -- Read surface -------------------------------------------------------

    /// Full chain, freshest from the store.
    pub fn chain(&self) -> Result<Vec<Block>, NodeError> {
        Ok(self.log.lock().chain()?)
    }

    /// ADS root at the chain tip.
    pub fn root_at_tip(&self) -> Result<String, NodeError> {
        Ok(self.log.lock().root_at_tip()?)
    }

    /// Proof-carrying read. Defaults to the tip height. Pays the service
    /// fee; a frozen account refuses the read.
    pub fn query(
        &self,
        key: &str,
        height: Option<i64>,
    ) -> Result<(Vec<u8>, Vec<ProofNode>, String), NodeError> {
        self.hook.pay_service(&self.id)?;

        let mut log = self.log.lock();
        let height = match height {
            Some(h) => h,
            None => log.tip()?.height(),
        };
        let (value, proof) = log.query(key, height)?;
        let root = log.root_at(height);
        Ok((value, proof, root))
    }

    /// Prefix scan of the live snapshot at a height (tip by default).
    pub fn scan(&self, prefix: &str, height: Option<i64>) -> Result<Vec<(String, Vec<u8>)>, NodeError> {
        let mut log = self.log.lock();
        let height = match height {
            Some(h) => h,
            None => log.tip()?.height(),
        };
        Ok(log.scan(prefix, height))
    }

    /// Sign an arbitrary header's canonical digest with this validator's
    /// key (the `sign_header` endpoint).
    pub fn sign_header(&self, header: &BlockHeader) -> Result<Vec<u8>, NodeError> {
        if !self.is_validator() {
            return Err(NodeError::NotValidator(self.id.clone()));
        }
        Ok(header.sign_with(&self.keypair).as_bytes().to_vec())
    }

    // -- Write path ---------------------------------------------------------

    /// Accept a client write: build the candidate block, sign it, and
    /// start consensus for its height. Returns the candidate and the new
    /// root so the caller can hand both back to the client.
    pub async fn submit_operation(
        self: &Arc<Self>,
        op: Operation,
    ) -> Result<(Block, String), NodeError> {
        if !self.is_validator() {
            return Err(NodeError::NotValidator(self.id.clone()));
        }
        self.hook.pay_service(&self.id)?;

        let mut block = {
            let mut log = self.log.lock();
            log.new_block(&op, self.keypair.public_key().as_bytes())?
        };
        block.header.signature = block.header.sign_with(&self.keypair).as_bytes().to_vec();
        block.header.validators = vec![self.id.clone()];
        block.header.signatures = vec![block.header.signature.clone()];

        let root = block.header.data_hash_hex();
        let height = block.height();
        let view = self
            .engine
            .begin_round(height, block.header.clone(), block.content.clone());

        info!(height, view, key = %op.key, "proposing block");
        self.arm_timer(height);
        self.multicast(
            "consensus/preprepare",
            serde_json::to_value(PrePrepare {
                height,
                view,
                header: block.header.clone(),
                content: block.content.clone(),
            })
            .expect("message serialization is infallible"),
            true,
        );

        // The proposal is also this node's prepare. Counting it locally
        // covers our own quorum; multicasting it lets the other replicas
        // count the primary without inferring a vote from the
        // pre-prepare.
        let own_prepare = self.own_vote(height, view, &block.header);
        self.multicast(
            "consensus/prepare",
            serde_json::to_value(&own_prepare).expect("message serialization is infallible"),
            true,
        );
        match self.engine.record_prepare(&own_prepare) {
            Ok(outcome) => self.advance(height, view, outcome).await,
            Err(e) => debug!(height, error = %e, "own prepare not recorded"),
        }

        Ok((block, root))
    }

    // -- Consensus inbound --------------------------------------------------

    /// Handle `pre-prepare`: accept the proposal, stand down the timer,
    /// and answer with our prepare vote.
    pub async fn handle_pre_prepare(self: &Arc<Self>, msg: PrePrepare) {
        match self.engine.record_pre_prepare(&msg) {
            Ok(()) => {}
            Err(ConsensusError::StaleView { height, got, current }) => {
                debug!(height, got, current, "stale pre-prepare dropped");
                return;
            }
            Err(e) => {
                warn!(height = msg.height, error = %e, "pre-prepare rejected");
                return;
            }
        }

        self.cancel_timer(msg.height);

        if !self.is_validator() {
            return;
        }

        let vote = self.own_vote(msg.height, msg.view, &msg.header);
        self.multicast(
            "consensus/prepare",
            serde_json::to_value(&vote).expect("message serialization is infallible"),
            true,
        );
        match self.engine.record_prepare(&vote) {
            Ok(outcome) => self.advance(msg.height, msg.view, outcome).await,
            Err(e) => debug!(height = msg.height, error = %e, "own prepare not recorded"),
        }
    }

    /// Handle a peer's `prepare` vote.
    pub async fn handle_prepare(self: &Arc<Self>, vote: PhaseVote) {
        let (height, view) = (vote.height, vote.view);
        match self.engine.record_prepare(&vote) {
            Ok(outcome) => self.advance(height, view, outcome).await,
            Err(ConsensusError::StaleView { .. }) => {
                debug!(height, view, "stale prepare dropped")
            }
            Err(e) => warn!(height, error = %e, "prepare rejected"),
        }
    }

    /// Handle a peer's `commit` vote.
    pub async fn handle_commit(self: &Arc<Self>, vote: PhaseVote) {
        let (height, view) = (vote.height, vote.view);
        match self.engine.record_commit(&vote) {
            Ok(outcome) => self.advance(height, view, outcome).await,
            Err(ConsensusError::StaleView { .. }) => {
                debug!(height, view, "stale commit dropped")
            }
            Err(e) => warn!(height, error = %e, "commit rejected"),
        }
    }

    /// Act on a phase outcome: send our commit when the prepare quorum
    /// forms, finalize when the commit quorum forms.
    async fn advance(self: &Arc<Self>, height: i64, view: i64, outcome: PhaseOutcome) {
        let mut committed = outcome.committed;

        if outcome.send_commit {
            let header = {
                let cell = self.engine.state(height);
                let st = cell.lock();
                st.pre_prepared.as_ref().map(|(h, _)| h.clone())
            };
            if let Some(header) = header {
                let vote = self.own_vote(height, view, &header);
                self.multicast(
                    "consensus/commit",
                    serde_json::to_value(&vote).expect("message serialization is infallible"),
                    true,
                );
                match self.engine.record_commit(&vote) {
                    Ok(own_outcome) => committed = committed.or(own_outcome.committed),
                    Err(e) => debug!(height, error = %e, "own commit not recorded"),
                }
            }
        }

        if let Some(block) = committed {
            if let Err(e) = self.commit_block(block).await {
                warn!(height, error = %e, "committed block not applied");
            }
        }
    }

    /// Append a consensus-final block locally and broadcast it to every
    /// peer. Re-commits of an already-seen block are acknowledged and
    /// skipped.
    async fn commit_block(self: &Arc<Self>, block: Block) -> Result<(), NodeError> {
        self.cancel_timer(block.height());

        let block_id = block.header.hash_hex();
        if self.seen.insert(block_id.clone(), ()).is_some() {
            debug!(height = block.height(), "block already committed, skipping");
            return Ok(());
        }

        {
            let mut log = self.log.lock();
            log.apply(&block)?;
            log.append_committed(block.clone())?;
        }
        info!(height = block.height(), hash = %block_id, "block committed");

        self.multicast(
            "broadcast",
            serde_json::to_value(&block).expect("message serialization is infallible"),
            false,
        );
        Ok(())
    }

    /// Handle a full committed block pushed by a peer: verify the quorum,
    /// de-duplicate, re-execute, and append if it extends the tip.
    pub fn handle_broadcast(&self, block: Block) -> Result<(), NodeError> {
        verify_committed_header(&block.header, self.validators())?;

        let block_id = block.header.hash_hex();
        if self.seen.insert(block_id, ()).is_some() {
            debug!(height = block.height(), "duplicate broadcast acknowledged");
            return Ok(());
        }

        let mut log = self.log.lock();
        log.apply(&block)?;
        log.append_committed(block.clone())?;
        info!(height = block.height(), "broadcast block appended");
        Ok(())
    }

    // -- View change --------------------------------------------------------

    /// The timeout path: vote to move this height to the next view.
    /// Public so the timer task and deterministic tests share one code
    /// path.
    pub async fn trigger_view_change(self: &Arc<Self>, height: i64) {
        if !self.is_validator() {
            return;
        }
        let view = self.engine.next_view(height);
        info!(height, view, "view-change timeout fired");

        let msg = ViewChange {
            height,
            view,
            validator: self.id.clone(),
            signature: sign_view_change(&self.keypair, height, view),
        };
        self.multicast(
            "consensus/viewchange",
            serde_json::to_value(&msg).expect("message serialization is infallible"),
            true,
        );
        self.handle_view_change(msg).await;
    }

    /// Handle a `view-change` vote; as the new primary with `f + 1`
    /// votes, announce the new view.
    pub async fn handle_view_change(self: &Arc<Self>, msg: ViewChange) {
        let height = msg.height;
        let outcome = match self.engine.record_view_change(&msg) {
            Ok(outcome) => outcome,
            Err(ConsensusError::StaleView { .. }) => {
                debug!(height, "stale view-change dropped");
                return;
            }
            Err(e) => {
                warn!(height, error = %e, "view-change rejected");
                return;
            }
        };

        if let Some((view, header, content)) = outcome.announce {
            info!(height, view, "announcing new view");
            let nv = NewView {
                height,
                view,
                validator: self.id.clone(),
                signature: sign_new_view(&self.keypair, height, view, &header),
                header,
                content,
            };
            self.multicast(
                "consensus/newview",
                serde_json::to_value(&nv).expect("message serialization is infallible"),
                true,
            );
            self.handle_new_view(nv).await;
        }
    }

    /// Handle a `new-view` announcement; once installed, the new primary
    /// restarts pre-prepare and everyone else re-arms the timer.
    pub async fn handle_new_view(self: &Arc<Self>, msg: NewView) {
        let height = msg.height;
        let outcome = match self.engine.record_new_view(&msg) {
            Ok(outcome) => outcome,
            Err(ConsensusError::StaleView { .. }) => {
                debug!(height, "stale new-view dropped");
                return;
            }
            Err(e) => {
                warn!(height, error = %e, "new-view rejected");
                return;
            }
        };

        let mut installed = outcome.installed;

        // Co-announce the primary's new view so the distinct-sender
        // count can reach f + 1.
        if outcome.echo {
            let echo = NewView {
                height,
                view: msg.view,
                validator: self.id.clone(),
                signature: sign_new_view(&self.keypair, height, msg.view, &msg.header),
                header: msg.header.clone(),
                content: msg.content.clone(),
            };
            self.multicast(
                "consensus/newview",
                serde_json::to_value(&echo).expect("message serialization is infallible"),
                true,
            );
            match self.engine.record_new_view(&echo) {
                Ok(own_outcome) => installed = installed.or(own_outcome.installed),
                Err(e) => debug!(height, error = %e, "own new-view echo not recorded"),
            }
        }

        let Some((view, header, content, is_primary)) = installed else {
            return;
        };
        info!(height, view, is_primary, "new view installed");
        self.arm_timer(height);

        if is_primary {
            self.multicast(
                "consensus/preprepare",
                serde_json::to_value(PrePrepare {
                    height,
                    view,
                    header: header.clone(),
                    content,
                })
                .expect("message serialization is infallible"),
                true,
            );
            let vote = self.own_vote(height, view, &header);
            self.multicast(
                "consensus/prepare",
                serde_json::to_value(&vote).expect("message serialization is infallible"),
                true,
            );
            match self.engine.record_prepare(&vote) {
                Ok(outcome) => self.advance(height, view, outcome).await,
                Err(e) => debug!(height, error = %e, "own prepare not recorded"),
            }
        }
    }

    // -- Sync ---------------------------------------------------------------

    /// One round of the background chain pull: ask every peer for its
    /// chain and adopt the longest valid one.
    pub async fn sync_round(&self) {
        for (peer_id, addr) in &self.peers {
            match self.transport.get_chain(addr).await {
                Ok(peer_chain) => match self.adopt_chain(peer_chain) {
                    Ok(true) => debug!(peer = %peer_id, "chain adopted from peer"),
                    Ok(false) => {}
                    Err(e) => debug!(peer = %peer_id, error = %e, "peer chain rejected"),
                },
                Err(e) => debug!(peer = %peer_id, error = %e, "chain pull failed"),
            }
        }
    }

    /// Adopt a peer's chain when it is strictly longer and every new
    /// block carries a verifiable quorum and re-executes to the root it
    /// claims. An unverifiable tail (e.g. a peer's uncommitted candidate)
    /// is truncated rather than poisoning the committed prefix.
    pub fn adopt_chain(&self, mut peer_chain: Vec<Block>) -> Result<bool, NodeError> {
        let mut log = self.log.lock();
        let local_len = log.len()?;
        if peer_chain.len() <= local_len {
            return Ok(false);
        }
        BlockLog::validate_chain(&peer_chain)?;

        // Genesis carries no signatures; every later block must.
        if let Some(bad) = peer_chain
            .iter()
            .position(|b| b.height() > 1 && verify_committed_header(&b.header, self.validators()).is_err())
        {
            peer_chain.truncate(bad);
            if peer_chain.len() <= local_len {
                return Ok(false);
            }
        }

        for block in &peer_chain[local_len..] {
            log.apply(block)?;
            self.seen.insert(block.header.hash_hex(), ());
        }
        Ok(log.replace_chain(peer_chain)?)
    }

    // -- Internals ----------------------------------------------------------

    /// Our signed vote over a header's canonical digest.
    fn own_vote(&self, height: i64, view: i64, header: &BlockHeader) -> PhaseVote {
        PhaseVote {
            height,
            view,
            validator: self.id.clone(),
            signature: header.sign_with(&self.keypair).as_bytes().to_vec(),
        }
    }

    /// Fire-and-forget multicast. Consensus traffic goes to validator
    /// peers only; block broadcasts go to everyone.
    fn multicast(self: &Arc<Self>, endpoint: &str, body: serde_json::Value, validators_only: bool) {
        for (peer_id, addr) in &self.peers {
            if validators_only && !self.validators().contains(peer_id) {
                continue;
            }
            let transport = Arc::clone(&self.transport);
            let endpoint = endpoint.to_string();
            let addr = addr.clone();
            let body = body.clone();
            let peer_id = peer_id.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.post_json(&addr, &endpoint, body).await {
                    debug!(peer = %peer_id, endpoint = %endpoint, error = %e, "send failed");
                }
            });
        }
    }

    /// Arm (or re-arm) the view-change timer for a height.
    fn arm_timer(self: &Arc<Self>, height: i64) {
        let node = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(VIEW_CHANGE_TIMEOUT).await;
            node.trigger_view_change(height).await;
        });
        if let Some(old) = self.timers.insert(height, handle) {
            old.abort();
        }
    }

    /// Cancel the view-change timer for a height, if armed.
    fn cancel_timer(&self, height: i64) {
        if let Some((_, handle)) = self.timers.remove(&height) {
            handle.abort();
        }
    }
}
