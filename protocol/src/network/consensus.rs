//! # Three-Phase Consensus Engine
//!
//! Leader-based Byzantine agreement, one instance per block height.
//! Tolerates `f` faulty validators out of `n = 3f + 1`; the quorum for
//! phase transitions is `ceil(2n/3)` signatures from distinct validators.
//!
//! ## Round State Machine
//!
//! ```text
//! pre-prepare -> prepare -> commit -> committed
//!      ^                                 |
//!      +---- view change (timeout) ------+
//! ```
//!
//! 1. The primary for the current view signs a candidate header and
//!    multicasts `pre-prepare` carrying the header *and* the operation
//!    content, so every replica can materialize the block at commit time.
//! 2. A replica that accepts a pre-prepare signs the header's canonical
//!    digest and multicasts `prepare`, counting its own vote.
//! 3. On a prepare quorum it signs again and multicasts `commit`.
//! 4. On a commit quorum it assembles the block — quorum signatures
//!    attached in sorted-validator order — and hands it to the caller to
//!    append and broadcast.
//!
//! If the primary goes quiet, replicas time out and vote to move to view
//! `v+1`; the primary for `v+1` needs `f+1` such votes to issue
//! `new-view`, and replicas that see `f+1` new-view messages install the
//! view and restart from pre-prepare.
//!
//! ## What this module is not
//!
//! There is no I/O here. The engine is a state machine: messages go in,
//! outcomes (send a prepare, block is committed, start a new view) come
//! out, and the node aggregate does the talking. That split is what makes
//! the protocol testable without sockets.
//!
//! ## Identity rules
//!
//! Every vote is keyed by validator id and verified against that
//! validator's registered public key — never by transport address.
//! Messages for a view other than the state's current view are silently
//! dropped. Duplicate votes overwrite themselves; re-delivery is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{NEW_VIEW_DOMAIN, VIEW_CHANGE_DOMAIN};
use crate::crypto::keys::{VeraKeypair, VeraPublicKey, VeraSignature};
use crate::storage::block::{hex_bytes, Block, BlockHeader};

// ---------------------------------------------------------------------------
// Validator Set
// ---------------------------------------------------------------------------

/// The static validator membership: id → public key.
///
/// Ids are operator-chosen strings; ordering (and therefore primary
/// rotation) is their lexicographic sort, which every replica derives
/// identically from the same membership.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    keys: BTreeMap<String, VeraPublicKey>,
}

impl ValidatorSet {
    /// Build a set from `(id, public key)` pairs.
    pub fn new(members: impl IntoIterator<Item = (String, VeraPublicKey)>) -> Self {
        Self {
            keys: members.into_iter().collect(),
        }
    }

    /// Number of validators, `n`.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Fault tolerance `f = (n - 1) / 3`.
    pub fn fault_tolerance(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Quorum threshold `ceil(2n/3)`.
    pub fn quorum(&self) -> usize {
        (2 * self.len()).div_ceil(3)
    }

    /// Validator ids in lexicographic order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// The primary for a view: sorted ids indexed by `view mod n`.
    pub fn primary_for(&self, view: i64) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let index = (view.rem_euclid(self.len() as i64)) as usize;
        self.keys.keys().nth(index).map(String::as_str)
    }

    /// Public key for an id.
    pub fn key_of(&self, id: &str) -> Option<&VeraPublicKey> {
        self.keys.get(id)
    }

    /// Whether an id is a member.
    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    /// The wire form served by `get_validators`: id → lowercase hex.
    pub fn to_hex_map(&self) -> BTreeMap<String, String> {
        self.keys
            .iter()
            .map(|(id, pk)| (id.clone(), pk.to_hex()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Wire Messages
// ---------------------------------------------------------------------------

/// Primary → all: the proposed header plus the operation content.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrePrepare {
    pub height: i64,
    pub view: i64,
    pub header: BlockHeader,
    #[serde(with = "hex_bytes")]
    pub content: Vec<u8>,
}

/// A prepare or commit vote: a signature over the pre-prepared header's
/// canonical digest, attributed to a validator id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseVote {
    pub height: i64,
    pub view: i64,
    pub validator: String,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// A vote to abandon the current view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewChange {
    pub height: i64,
    /// The view being voted *for* (current + 1 at the sender).
    pub view: i64,
    pub validator: String,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// The next primary's announcement of the new view, re-proposing the
/// pre-prepared header.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewView {
    pub height: i64,
    pub view: i64,
    pub validator: String,
    pub header: BlockHeader,
    #[serde(with = "hex_bytes")]
    pub content: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Signed payload of a view-change vote: domain tag, height, target view.
pub fn view_change_bytes(height: i64, view: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(VIEW_CHANGE_DOMAIN.len() + 16);
    out.extend_from_slice(VIEW_CHANGE_DOMAIN);
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&view.to_be_bytes());
    out
}

/// Signed payload of a new-view announcement: domain tag, height, view,
/// and the hash of the header being re-proposed.
pub fn new_view_bytes(height: i64, view: i64, header: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(NEW_VIEW_DOMAIN.len() + 48);
    out.extend_from_slice(NEW_VIEW_DOMAIN);
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&view.to_be_bytes());
    out.extend_from_slice(&header.hash());
    out
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while processing consensus messages. None of these are
/// fatal — the message is rejected and the replica keeps running.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Message for a view other than the state's current view. Dropped.
    #[error("stale view at height {height}: message view {got}, current {current}")]
    StaleView { height: i64, got: i64, current: i64 },

    /// The sender is not in the validator set.
    #[error("unknown validator {0}")]
    ValidatorUnknown(String),

    /// A signature failed verification against the claimed validator.
    #[error("invalid signature from validator {validator}")]
    SignatureInvalid { validator: String },

    /// A commit quorum formed but no pre-prepared header is known.
    #[error("no pre-prepared header at height {0}")]
    MissingPrePrepare(i64),

    /// `validators` and `signatures` disagree in length.
    #[error("quorum count mismatch: {validators} validators, {signatures} signatures")]
    QuorumCountMismatch {
        validators: usize,
        signatures: usize,
    },
}

// ---------------------------------------------------------------------------
// Per-Height State
// ---------------------------------------------------------------------------

/// Agreement state for one height. Everything is keyed by the current
/// view; a view change resets the vote sets but keeps the height.
#[derive(Debug, Default)]
pub struct ConsensusState {
    /// Current view, monotone non-decreasing, starts at 0.
    pub view: i64,
    /// The proposed header and its operation content, once seen.
    pub pre_prepared: Option<(BlockHeader, Vec<u8>)>,
    /// Prepare votes by validator id. Verified lazily: a vote that
    /// arrives before the pre-prepare is held and checked once the
    /// header (and thus the digest) is known.
    prepare_votes: BTreeMap<String, Vec<u8>>,
    /// Commit votes by validator id, same verification discipline.
    commit_votes: BTreeMap<String, Vec<u8>>,
    /// View-change votes: validator id → view voted for.
    view_change_votes: BTreeMap<String, i64>,
    /// New-view announcements seen, by sender id, for the target view.
    new_view_senders: BTreeMap<String, i64>,
    /// Whether this replica already multicast its commit for this view.
    pub commit_sent: bool,
    /// Whether a block has been committed at this height.
    pub committed: bool,
}

impl ConsensusState {
    fn drop_unverifiable_votes(&mut self, validators: &ValidatorSet) {
        let Some((header, _)) = &self.pre_prepared else {
            return;
        };
        let header = header.clone();
        for votes in [&mut self.prepare_votes, &mut self.commit_votes] {
            votes.retain(|id, sig| {
                let valid = validators
                    .key_of(id)
                    .map(|pk| header.verify_signature(pk, sig))
                    .unwrap_or(false);
                if !valid {
                    warn!(validator = %id, "dropping unverifiable phase vote");
                }
                valid
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What the caller should do after feeding a message to the engine.
#[derive(Debug, Default)]
pub struct PhaseOutcome {
    /// A prepare quorum formed and this replica has not yet sent its
    /// commit: sign and multicast a commit vote now.
    pub send_commit: bool,
    /// A commit quorum formed: this block is final at its height.
    /// Apply, append, and broadcast it.
    pub committed: Option<Block>,
}

/// Result of recording a view-change vote.
#[derive(Debug, Default)]
pub struct ViewChangeOutcome {
    /// This node is the primary for the proposed view and has gathered
    /// `f + 1` votes: announce the new view with this proposal.
    pub announce: Option<(i64, BlockHeader, Vec<u8>)>,
}

/// Result of recording a new-view announcement.
#[derive(Debug, Default)]
pub struct NewViewOutcome {
    /// The announcement came from the target view's primary and this
    /// validator has not yet co-announced: echo it. The echo is what
    /// lets the distinct-sender count reach `f + 1` when `f > 0` — a
    /// lone primary can never be more than one sender.
    pub echo: bool,
    /// `f + 1` announcements observed: the view is installed. Carries
    /// `(view, header, content, this_node_is_primary)` so the caller can
    /// restart pre-prepare (primary) or arm its timer (replica).
    pub installed: Option<(i64, BlockHeader, Vec<u8>, bool)>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The per-height agreement state machine for one replica.
///
/// Thread-safe: states live in a concurrent map, each behind its own
/// mutex, so different heights make progress independently while a
/// single height's transitions stay linearized.
pub struct ConsensusEngine {
    self_id: String,
    validators: ValidatorSet,
    states: DashMap<i64, Arc<Mutex<ConsensusState>>>,
}

impl ConsensusEngine {
    pub fn new(self_id: String, validators: ValidatorSet) -> Self {
        Self {
            self_id,
            validators,
            states: DashMap::new(),
        }
    }

    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Whether this replica is the primary for a view.
    pub fn is_primary_for(&self, view: i64) -> bool {
        self.validators.primary_for(view) == Some(self.self_id.as_str())
    }

    /// The state cell for a height, created on first touch.
    pub fn state(&self, height: i64) -> Arc<Mutex<ConsensusState>> {
        self.states
            .entry(height)
            .or_insert_with(|| Arc::new(Mutex::new(ConsensusState::default())))
            .clone()
    }

    /// Primary path: install our own proposal for this height and reset
    /// any view-change bookkeeping from an earlier round.
    pub fn begin_round(&self, height: i64, header: BlockHeader, content: Vec<u8>) -> i64 {
        let cell = self.state(height);
        let mut st = cell.lock();
        st.view_change_votes.clear();
        st.new_view_senders.clear();
        st.pre_prepared = Some((header, content));
        st.view
    }

    /// Record an incoming pre-prepare. The proposer's signature must
    /// verify against the header's `initiator` key, which must belong to
    /// a known validator.
    pub fn record_pre_prepare(&self, msg: &PrePrepare) -> Result<(), ConsensusError> {
        let initiator_id = self
            .validators
            .ids()
            .find(|id| {
                self.validators
                    .key_of(id)
                    .map(|pk| pk.as_bytes().as_slice() == msg.header.initiator.as_slice())
                    .unwrap_or(false)
            })
            .map(str::to_owned)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(hex::encode(&msg.header.initiator)))?;

        let initiator_key = self
            .validators
            .key_of(&initiator_id)
            .expect("id came from the set");
        if !msg
            .header
            .verify_signature(initiator_key, &msg.header.signature)
        {
            return Err(ConsensusError::SignatureInvalid {
                validator: initiator_id,
            });
        }

        let cell = self.state(msg.height);
        let mut st = cell.lock();
        if msg.view != st.view {
            return Err(ConsensusError::StaleView {
                height: msg.height,
                got: msg.view,
                current: st.view,
            });
        }
        st.pre_prepared = Some((msg.header.clone(), msg.content.clone()));
        st.drop_unverifiable_votes(&self.validators);
        debug!(height = msg.height, view = msg.view, "pre-prepare recorded");
        Ok(())
    }

    /// Record a prepare vote and report whether the quorum formed.
    pub fn record_prepare(&self, vote: &PhaseVote) -> Result<PhaseOutcome, ConsensusError> {
        self.record_phase_vote(vote, Phase::Prepare)
    }

    /// Record a commit vote; on quorum, materialize the committed block.
    pub fn record_commit(&self, vote: &PhaseVote) -> Result<PhaseOutcome, ConsensusError> {
        self.record_phase_vote(vote, Phase::Commit)
    }

    fn record_phase_vote(
        &self,
        vote: &PhaseVote,
        phase: Phase,
    ) -> Result<PhaseOutcome, ConsensusError> {
        if !self.validators.contains(&vote.validator) {
            return Err(ConsensusError::ValidatorUnknown(vote.validator.clone()));
        }

        let cell = self.state(vote.height);
        let mut st = cell.lock();
        if vote.view != st.view {
            return Err(ConsensusError::StaleView {
                height: vote.height,
                got: vote.view,
                current: st.view,
            });
        }

        // Verify eagerly when the digest is known; otherwise hold the
        // vote and let the pre-prepare sweep re-check it.
        if let Some((header, _)) = &st.pre_prepared {
            let pk = self
                .validators
                .key_of(&vote.validator)
                .expect("membership checked above");
            if !header.verify_signature(pk, &vote.signature) {
                return Err(ConsensusError::SignatureInvalid {
                    validator: vote.validator.clone(),
                });
            }
        }

        match phase {
            Phase::Prepare => {
                st.prepare_votes
                    .insert(vote.validator.clone(), vote.signature.clone());
            }
            Phase::Commit => {
                st.commit_votes
                    .insert(vote.validator.clone(), vote.signature.clone());
            }
        }

        Ok(self.evaluate(&mut st, vote.height))
    }

    /// Check quorum conditions and emit the next action, if any.
    fn evaluate(&self, st: &mut ConsensusState, height: i64) -> PhaseOutcome {
        let mut outcome = PhaseOutcome::default();
        let quorum = self.validators.quorum();
        let Some((header, content)) = st.pre_prepared.clone() else {
            return outcome;
        };

        if !st.commit_sent && st.prepare_votes.len() >= quorum {
            st.commit_sent = true;
            outcome.send_commit = true;
            debug!(height, prepares = st.prepare_votes.len(), "prepare quorum reached");
        }

        if !st.committed && st.commit_votes.len() >= quorum {
            st.committed = true;
            let mut header = header;
            header.validators = st.commit_votes.keys().cloned().collect();
            header.signatures = st.commit_votes.values().cloned().collect();
            outcome.committed = Some(Block { header, content });
            debug!(height, commits = st.commit_votes.len(), "commit quorum reached");
        }

        outcome
    }

    /// The view a timing-out replica should vote for.
    pub fn next_view(&self, height: i64) -> i64 {
        self.state(height).lock().view + 1
    }

    /// Record a view-change vote. When `f + 1` votes for the same target
    /// view have arrived and this node is that view's primary, returns
    /// the proposal to announce.
    pub fn record_view_change(
        &self,
        msg: &ViewChange,
    ) -> Result<ViewChangeOutcome, ConsensusError> {
        let pk = self
            .validators
            .key_of(&msg.validator)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(msg.validator.clone()))?;
        let payload = view_change_bytes(msg.height, msg.view);
        if !pk.verify(&payload, &VeraSignature::from_bytes(msg.signature.clone())) {
            return Err(ConsensusError::SignatureInvalid {
                validator: msg.validator.clone(),
            });
        }

        let cell = self.state(msg.height);
        let mut st = cell.lock();
        if msg.view <= st.view {
            return Err(ConsensusError::StaleView {
                height: msg.height,
                got: msg.view,
                current: st.view,
            });
        }
        st.view_change_votes.insert(msg.validator.clone(), msg.view);

        let votes_for_view = st
            .view_change_votes
            .values()
            .filter(|v| **v == msg.view)
            .count();
        let threshold = self.validators.fault_tolerance() + 1;

        let mut outcome = ViewChangeOutcome::default();
        if votes_for_view >= threshold && self.is_primary_for(msg.view) {
            if let Some((header, content)) = st.pre_prepared.clone() {
                outcome.announce = Some((msg.view, header, content));
            } else {
                warn!(
                    height = msg.height,
                    view = msg.view,
                    "view-change quorum but no proposal to re-announce"
                );
            }
        }
        Ok(outcome)
    }

    /// Record a new-view announcement. When `f + 1` distinct senders have
    /// announced a view newer than ours, install it: adopt the proposal,
    /// clear the vote sets, and report whether we are the new primary.
    pub fn record_new_view(&self, msg: &NewView) -> Result<NewViewOutcome, ConsensusError> {
        let pk = self
            .validators
            .key_of(&msg.validator)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(msg.validator.clone()))?;
        let payload = new_view_bytes(msg.height, msg.view, &msg.header);
        if !pk.verify(&payload, &VeraSignature::from_bytes(msg.signature.clone())) {
            return Err(ConsensusError::SignatureInvalid {
                validator: msg.validator.clone(),
            });
        }

        let cell = self.state(msg.height);
        let mut st = cell.lock();
        if msg.view <= st.view {
            return Err(ConsensusError::StaleView {
                height: msg.height,
                got: msg.view,
                current: st.view,
            });
        }
        st.new_view_senders.insert(msg.validator.clone(), msg.view);

        let senders_for_view = st
            .new_view_senders
            .values()
            .filter(|v| **v == msg.view)
            .count();
        let threshold = self.validators.fault_tolerance() + 1;

        let mut outcome = NewViewOutcome::default();
        outcome.echo = self.validators.primary_for(msg.view) == Some(msg.validator.as_str())
            && msg.validator != self.self_id
            && self.validators.contains(&self.self_id)
            && !st.new_view_senders.contains_key(&self.self_id);
        if senders_for_view >= threshold {
            st.view = msg.view;
            st.pre_prepared = Some((msg.header.clone(), msg.content.clone()));
            st.prepare_votes.clear();
            st.commit_votes.clear();
            st.commit_sent = false;
            outcome.installed = Some((
                msg.view,
                msg.header.clone(),
                msg.content.clone(),
                self.is_primary_for(msg.view),
            ));
            debug!(height = msg.height, view = msg.view, "new view installed");
        }
        Ok(outcome)
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Prepare,
    Commit,
}

/// Header sanity for committed blocks: the validator and signature lists
/// line up, the initiator's signature verifies, and every listed
/// validator is known and really signed the canonical digest.
///
/// Used by the broadcast handler and by light clients — the two places a
/// finished block crosses a trust boundary.
pub fn verify_committed_header(
    header: &BlockHeader,
    validators: &ValidatorSet,
) -> Result<(), ConsensusError> {
    if header.validators.len() != header.signatures.len() {
        return Err(ConsensusError::QuorumCountMismatch {
            validators: header.validators.len(),
            signatures: header.signatures.len(),
        });
    }

    let initiator = VeraPublicKey::from_bytes(&header.initiator)
        .map_err(|_| ConsensusError::ValidatorUnknown(hex::encode(&header.initiator)))?;
    if !header.verify_signature(&initiator, &header.signature) {
        return Err(ConsensusError::SignatureInvalid {
            validator: hex::encode(&header.initiator),
        });
    }

    for (id, signature) in header.validators.iter().zip(&header.signatures) {
        let pk = validators
            .key_of(id)
            .ok_or_else(|| ConsensusError::ValidatorUnknown(id.clone()))?;
        if !header.verify_signature(pk, signature) {
            return Err(ConsensusError::SignatureInvalid {
                validator: id.clone(),
            });
        }
    }
    Ok(())
}

/// Sign a view-change vote.
pub fn sign_view_change(keypair: &VeraKeypair, height: i64, view: i64) -> Vec<u8> {
    keypair.sign(&view_change_bytes(height, view)).as_bytes().to_vec()
}

/// Sign a new-view announcement.
pub fn sign_new_view(
    keypair: &VeraKeypair,
    height: i64,
    view: i64,
    header: &BlockHeader,
) -> Vec<u8> {
    keypair
        .sign(&new_view_bytes(height, view, header))
        .as_bytes()
        .to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::store::VersionStore;
    use crate::storage::block::Operation;
    use crate::storage::chain::BlockLog;

    struct Fixture {
        keypairs: BTreeMap<String, VeraKeypair>,
        validators: ValidatorSet,
        candidate: Block,
    }

    /// `n` deterministic validators (`v0..`) plus a signed candidate block
    /// proposed by `v0`.
    fn fixture(n: usize) -> Fixture {
        let keypairs: BTreeMap<String, VeraKeypair> = (0..n)
            .map(|i| (format!("v{i}"), VeraKeypair::from_seed(&[i as u8 + 1; 32])))
            .collect();
        let validators = ValidatorSet::new(
            keypairs
                .iter()
                .map(|(id, kp)| (id.clone(), kp.public_key())),
        );

        let mut log = BlockLog::in_memory(VersionStore::in_memory());
        let proposer = &keypairs["v0"];
        let op = Operation {
            key: "hey".into(),
            value: b"bar".to_vec(),
        };
        let mut candidate = log
            .new_block(&op, proposer.public_key().as_bytes())
            .unwrap();
        candidate.header.signature = candidate.header.sign_with(proposer).as_bytes().to_vec();

        Fixture {
            keypairs,
            validators,
            candidate,
        }
    }

    fn vote(fx: &Fixture, id: &str, view: i64) -> PhaseVote {
        PhaseVote {
            height: fx.candidate.height(),
            view,
            validator: id.to_string(),
            signature: fx.candidate.header.sign_with(&fx.keypairs[id]).as_bytes().to_vec(),
        }
    }

    fn pre_prepare(fx: &Fixture, view: i64) -> PrePrepare {
        PrePrepare {
            height: fx.candidate.height(),
            view,
            header: fx.candidate.header.clone(),
            content: fx.candidate.content.clone(),
        }
    }

    #[test]
    fn quorum_math() {
        let vs = |n: usize| {
            ValidatorSet::new(
                (0..n).map(|i| {
                    (
                        format!("v{i}"),
                        VeraKeypair::from_seed(&[i as u8 + 1; 32]).public_key(),
                    )
                }),
            )
        };
        assert_eq!(vs(4).quorum(), 3);
        assert_eq!(vs(4).fault_tolerance(), 1);
        assert_eq!(vs(7).quorum(), 5);
        assert_eq!(vs(7).fault_tolerance(), 2);
        assert_eq!(vs(10).quorum(), 7);
        assert_eq!(vs(10).fault_tolerance(), 3);
    }

    #[test]
    fn primary_rotates_over_sorted_ids() {
        let fx = fixture(4);
        assert_eq!(fx.validators.primary_for(0), Some("v0"));
        assert_eq!(fx.validators.primary_for(1), Some("v1"));
        assert_eq!(fx.validators.primary_for(4), Some("v0"));
        assert_eq!(fx.validators.primary_for(6), Some("v2"));
    }

    #[test]
    fn happy_path_reaches_commit() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());

        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();

        // Quorum for n=4 is 3.
        assert!(!engine.record_prepare(&vote(&fx, "v0", 0)).unwrap().send_commit);
        assert!(!engine.record_prepare(&vote(&fx, "v1", 0)).unwrap().send_commit);
        let third = engine.record_prepare(&vote(&fx, "v2", 0)).unwrap();
        assert!(third.send_commit, "third prepare should trip the quorum");

        assert!(engine.record_commit(&vote(&fx, "v0", 0)).unwrap().committed.is_none());
        assert!(engine.record_commit(&vote(&fx, "v1", 0)).unwrap().committed.is_none());
        let block = engine
            .record_commit(&vote(&fx, "v3", 0))
            .unwrap()
            .committed
            .expect("commit quorum should materialize the block");

        assert_eq!(block.header.validators, vec!["v0", "v1", "v3"]);
        assert_eq!(block.header.signatures.len(), 3);
        verify_committed_header(&block.header, &fx.validators).unwrap();
    }

    #[test]
    fn duplicate_votes_do_not_double_count() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());
        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();

        for _ in 0..5 {
            let outcome = engine.record_prepare(&vote(&fx, "v0", 0)).unwrap();
            assert!(!outcome.send_commit);
        }
    }

    #[test]
    fn stale_view_messages_are_dropped() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());
        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();

        assert!(matches!(
            engine.record_prepare(&vote(&fx, "v0", 3)),
            Err(ConsensusError::StaleView { got: 3, current: 0, .. })
        ));
    }

    #[test]
    fn unknown_and_forged_votes_are_rejected() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());
        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();

        let mut stranger = vote(&fx, "v0", 0);
        stranger.validator = "mallory".into();
        assert!(matches!(
            engine.record_prepare(&stranger),
            Err(ConsensusError::ValidatorUnknown(_))
        ));

        // v2's claimed vote carrying v0's signature.
        let mut forged = vote(&fx, "v0", 0);
        forged.validator = "v2".into();
        assert!(matches!(
            engine.record_prepare(&forged),
            Err(ConsensusError::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn early_votes_are_verified_once_header_arrives() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());

        // Votes land before the pre-prepare: two honest, one forged.
        engine.record_prepare(&vote(&fx, "v0", 0)).unwrap();
        engine.record_prepare(&vote(&fx, "v1", 0)).unwrap();
        let mut forged = vote(&fx, "v0", 0);
        forged.validator = "v3".into();
        engine.record_prepare(&forged).unwrap();

        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();

        // The forged vote was swept; v2's honest vote completes a quorum
        // of exactly three verified votes.
        let outcome = engine.record_prepare(&vote(&fx, "v2", 0)).unwrap();
        assert!(outcome.send_commit);
    }

    #[test]
    fn view_change_threshold_and_new_view() {
        let fx = fixture(4);
        // v1 is the primary for view 1.
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());
        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();

        let height = fx.candidate.height();
        let vc = |id: &str| ViewChange {
            height,
            view: 1,
            validator: id.to_string(),
            signature: sign_view_change(&fx.keypairs[id], height, 1),
        };

        // f + 1 = 2 votes needed.
        assert!(engine.record_view_change(&vc("v0")).unwrap().announce.is_none());
        let outcome = engine.record_view_change(&vc("v2")).unwrap();
        let (view, header, _) = outcome.announce.expect("threshold met at the new primary");
        assert_eq!(view, 1);
        assert_eq!(header, fx.candidate.header);
    }

    #[test]
    fn new_view_installs_and_resets_votes() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v2".into(), fx.validators.clone());
        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();
        engine.record_prepare(&vote(&fx, "v0", 0)).unwrap();

        let height = fx.candidate.height();
        let nv = |id: &str| NewView {
            height,
            view: 1,
            validator: id.to_string(),
            header: fx.candidate.header.clone(),
            content: fx.candidate.content.clone(),
            signature: sign_new_view(&fx.keypairs[id], height, 1, &fx.candidate.header),
        };

        assert!(engine.record_new_view(&nv("v1")).unwrap().installed.is_none());
        let outcome = engine.record_new_view(&nv("v3")).unwrap();
        let (view, _, _, is_primary) = outcome.installed.expect("f+1 announcements");
        assert_eq!(view, 1);
        assert!(!is_primary, "v2 is not the primary for view 1");

        // Old prepare votes were cleared; the round restarts cleanly.
        let cell = engine.state(height);
        let st = cell.lock();
        assert_eq!(st.view, 1);
        assert!(st.prepare_votes.is_empty());
        assert!(!st.commit_sent);
    }

    #[test]
    fn committed_header_sanity_checks() {
        let fx = fixture(4);
        let engine = ConsensusEngine::new("v1".into(), fx.validators.clone());
        engine.record_pre_prepare(&pre_prepare(&fx, 0)).unwrap();
        for id in ["v0", "v1", "v2"] {
            engine.record_prepare(&vote(&fx, id, 0)).unwrap();
        }
        let mut block = None;
        for id in ["v0", "v1", "v2"] {
            block = engine.record_commit(&vote(&fx, id, 0)).unwrap().committed.or(block);
        }
        let block = block.unwrap();

        // Mismatched list lengths.
        let mut bad = block.header.clone();
        bad.signatures.pop();
        assert!(matches!(
            verify_committed_header(&bad, &fx.validators),
            Err(ConsensusError::QuorumCountMismatch { .. })
        ));

        // Unknown validator id.
        let mut bad = block.header.clone();
        bad.validators[0] = "nobody".into();
        assert!(matches!(
            verify_committed_header(&bad, &fx.validators),
            Err(ConsensusError::ValidatorUnknown(_))
        ));

        // Swapped signatures.
        let mut bad = block.header.clone();
        bad.signatures.swap(0, 1);
        assert!(matches!(
            verify_committed_header(&bad, &fx.validators),
            Err(ConsensusError::SignatureInvalid { .. })
        ));
    }
}
