//! CoinJoin session coordination.
//!
//! The coordinator owns every session in an arena keyed by session id;
//! participants refer to sessions by id, never by reference. A session walks
//! the phase machine below, with an independent deadline per phase:
//!
//! ```text
//! WAITING -> COLLECTING_BLINDED -> SIGNING -> COLLECTING_UNBLINDED
//!         -> BUILDING_TRANSACTION -> SIGNING_TRANSACTION -> BROADCASTING
//!         -> COMPLETED
//! ```
//!
//! Any live phase can drop to ABORTED (deadline, operator or participant
//! abort) or FAILED (missing input signatures, broadcast budget exhausted).
//!
//! Privacy invariants: the coordinator signs blinded values only, unblinded
//! submissions arrive on fresh channels with no participant id attached, and
//! output ordering is a uniform shuffle independent of input order.

use std::collections::HashMap;

use ed25519_dalek::{PublicKey, Signature, Verifier};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::RngCore;
use tracing::{info, warn};

use super::messages::{parse_biguint, ClientMessage, CoordinatorMessage, WireTransaction};
use crate::blindsig::{self, RsaPrivateKey, RsaPublicKey};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::threshold::{combine_partial_signatures, KeyShare};

/// Domain separator for join-request signatures.
const JOIN_DOMAIN: &[u8] = b"coinjoin_join_v1";

/// Allowed clock skew on join timestamps.
const JOIN_TIMESTAMP_SKEW_SECS: i64 = 300;

/// Broadcast retry budget before a session fails.
const MAX_BROADCAST_ATTEMPTS: u32 = 3;

pub type SessionId = u64;
pub type ParticipantId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    CollectingBlinded,
    Signing,
    CollectingUnblinded,
    BuildingTransaction,
    SigningTransaction,
    Broadcasting,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Aborted
        )
    }

    fn name(self) -> &'static str {
        match self {
            SessionState::Waiting => "WAITING",
            SessionState::CollectingBlinded => "COLLECTING_BLINDED",
            SessionState::Signing => "SIGNING",
            SessionState::CollectingUnblinded => "COLLECTING_UNBLINDED",
            SessionState::BuildingTransaction => "BUILDING_TRANSACTION",
            SessionState::SigningTransaction => "SIGNING_TRANSACTION",
            SessionState::Broadcasting => "BROADCASTING",
            SessionState::Completed => "COMPLETED",
            SessionState::Failed => "FAILED",
            SessionState::Aborted => "ABORTED",
        }
    }
}

/// A message leaving the coordinator, addressed or broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    Direct {
        participant_id: ParticipantId,
        message: CoordinatorMessage,
    },
    Broadcast(CoordinatorMessage),
}

/// Canonical bytes a participant signs to join.
pub fn join_message_bytes(denomination: u64, timestamp: i64, nonce: &[u8; 32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(JOIN_DOMAIN.len() + 8 + 8 + 32);
    bytes.extend_from_slice(JOIN_DOMAIN);
    bytes.extend_from_slice(&denomination.to_le_bytes());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(nonce);
    bytes
}

/// A parsed, signature-carrying join request.
#[derive(Clone, Debug)]
pub struct JoinSubmission {
    pub denomination: u64,
    pub public_key: [u8; 32],
    pub timestamp: i64,
    pub nonce: [u8; 32],
    pub signature: [u8; 64],
}

impl JoinSubmission {
    /// Client-side helper: sign a fresh join request.
    pub fn create(
        keypair: &ed25519_dalek::Keypair,
        denomination: u64,
        timestamp: i64,
    ) -> Self {
        use ed25519_dalek::Signer;
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        let message = join_message_bytes(denomination, timestamp, &nonce);
        Self {
            denomination,
            public_key: keypair.public.to_bytes(),
            timestamp,
            nonce,
            signature: keypair.sign(&message).to_bytes(),
        }
    }

    fn verify(&self) -> CoreResult<()> {
        let key = PublicKey::from_bytes(&self.public_key)
            .map_err(|_| CoreError::MalformedInput("bad join public key".into()))?;
        let signature = Signature::from_bytes(&self.signature)
            .map_err(|_| CoreError::MalformedInput("bad join signature".into()))?;
        let message = join_message_bytes(self.denomination, self.timestamp, &self.nonce);
        key.verify(&message, &signature)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

/// The coordinator's signing capability: one key, or t-of-n shares.
pub enum CoordinatorKey {
    Single(RsaPrivateKey),
    /// Shareholder set using the placeholder Lagrange combination; see the
    /// threshold module notes before using this outside tests.
    Threshold {
        shares: Vec<KeyShare>,
        threshold: usize,
    },
}

impl CoordinatorKey {
    pub fn public_key(&self) -> CoreResult<RsaPublicKey> {
        match self {
            CoordinatorKey::Single(key) => Ok(key.public_key().clone()),
            CoordinatorKey::Threshold { shares, .. } => shares
                .first()
                .map(|s| s.public_key.clone())
                .ok_or_else(|| CoreError::MalformedInput("empty share set".into())),
        }
    }

    fn sign_blinded(&self, blinded: &BigUint) -> CoreResult<BigUint> {
        match self {
            CoordinatorKey::Single(key) => blindsig::sign_blinded(blinded, key),
            CoordinatorKey::Threshold { shares, threshold } => {
                let partials = shares
                    .iter()
                    .take(*threshold)
                    .map(|share| share.partial_sign(blinded))
                    .collect::<CoreResult<Vec<_>>>()?;
                let n = self.public_key()?.n;
                combine_partial_signatures(&partials, *threshold, &n)
            }
        }
    }
}

struct Participant {
    public_key: [u8; 32],
    blinded_commitment: Option<BigUint>,
    input_address: Option<String>,
    input_signature: Option<String>,
}

pub struct Session {
    pub id: SessionId,
    pub denomination: u64,
    state: SessionState,
    phase_deadline: i64,
    participants: HashMap<ParticipantId, Participant>,
    join_order: Vec<ParticipantId>,
    /// (commitment, blind signature) pairs from the pseudonymous phase.
    unblinded: Vec<(BigUint, BigUint)>,
    transaction: Option<WireTransaction>,
    broadcast_attempts: u32,
}

impl Session {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn unblinded_count(&self) -> usize {
        self.unblinded.len()
    }

    pub fn transaction(&self) -> Option<&WireTransaction> {
        self.transaction.as_ref()
    }

    /// Reject a message that does not belong to the current phase.
    fn ensure_phase(&self, expected: SessionState) -> CoreResult<()> {
        if self.state == expected {
            return Ok(());
        }
        match self.state {
            SessionState::Aborted => {
                Err(CoreError::SessionAborted("session is aborted".into()))
            }
            _ => Err(CoreError::Protocol(format!(
                "expected phase {}, session is in {}",
                expected.name(),
                self.state.name()
            ))),
        }
    }

    fn enter(&mut self, state: SessionState, now: i64, timeout: i64) {
        info!(
            session = self.id,
            from = self.state.name(),
            to = state.name(),
            "session transition"
        );
        self.state = state;
        self.phase_deadline = now + timeout;
    }
}

pub struct Coordinator {
    config: CoreConfig,
    key: CoordinatorKey,
    sessions: HashMap<SessionId, Session>,
    next_session_id: SessionId,
}

impl Coordinator {
    pub fn new(config: CoreConfig, key: CoordinatorKey) -> CoreResult<Self> {
        config.validate()?;
        key.public_key()?;
        Ok(Self {
            config,
            key,
            sessions: HashMap::new(),
            next_session_id: 1,
        })
    }

    /// The RSA public key participants verify blind signatures against.
    pub fn signing_public_key(&self) -> RsaPublicKey {
        self.key.public_key().expect("validated at construction")
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn create_session(&mut self, denomination: u64, now: i64) -> CoreResult<SessionId> {
        if !self.config.is_valid_denomination(denomination) {
            return Err(CoreError::InvalidDenomination(denomination));
        }
        let id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(
            id,
            Session {
                id,
                denomination,
                state: SessionState::Waiting,
                phase_deadline: now + self.config.session_timeout_secs,
                participants: HashMap::new(),
                join_order: Vec::new(),
                unblinded: Vec::new(),
                transaction: None,
                broadcast_attempts: 0,
            },
        );
        info!(session = id, denomination, "coinjoin session created");
        Ok(id)
    }

    /// Admit a participant. The returned id is opaque and unrelated to the
    /// wallet key that signed the request.
    pub fn join(
        &mut self,
        session_id: SessionId,
        submission: &JoinSubmission,
        now: i64,
    ) -> CoreResult<(ParticipantId, Vec<Outgoing>)> {
        let min = self.config.min_participants;
        let max = self.config.max_participants;
        let timeout = self.config.session_timeout_secs;
        let session = self.session_mut(session_id)?;

        if !matches!(
            session.state,
            SessionState::Waiting | SessionState::CollectingBlinded
        ) {
            return Err(CoreError::Protocol(format!(
                "cannot join in phase {}",
                session.state.name()
            )));
        }
        if submission.denomination != session.denomination {
            return Err(CoreError::InvalidDenomination(submission.denomination));
        }
        if (now - submission.timestamp).abs() > JOIN_TIMESTAMP_SKEW_SECS {
            return Err(CoreError::SessionExpired);
        }
        submission.verify()?;
        if session.participants.len() >= max {
            return Err(CoreError::SessionFull);
        }
        if session
            .participants
            .values()
            .any(|p| p.public_key == submission.public_key)
        {
            return Err(CoreError::Protocol("wallet key already joined".into()));
        }

        let participant_id = OsRng.next_u64();
        session.participants.insert(
            participant_id,
            Participant {
                public_key: submission.public_key,
                blinded_commitment: None,
                input_address: None,
                input_signature: None,
            },
        );
        session.join_order.push(participant_id);

        let mut outgoing = vec![
            Outgoing::Direct {
                participant_id,
                message: CoordinatorMessage::Joined {
                    participant_id: format!("{participant_id:016x}"),
                },
            },
            Outgoing::Broadcast(CoordinatorMessage::ParticipantCount {
                count: session.participants.len(),
            }),
        ];

        if session.state == SessionState::Waiting && session.participants.len() >= min {
            session.enter(SessionState::CollectingBlinded, now, timeout);
            outgoing.push(Outgoing::Broadcast(CoordinatorMessage::SessionStarting));
            outgoing.push(Outgoing::Broadcast(
                CoordinatorMessage::RequestBlindedCommitment,
            ));
        }
        Ok((participant_id, outgoing))
    }

    /// Accept one blinded commitment per participant; signs the whole batch
    /// once everyone has submitted.
    pub fn submit_blinded(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
        blinded: BigUint,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        let timeout = self.config.session_timeout_secs;
        let session = self.sessions.get_mut(&session_id).ok_or_else(|| {
            CoreError::MalformedInput(format!("unknown session {session_id}"))
        })?;
        session.ensure_phase(SessionState::CollectingBlinded)?;
        let participant = session
            .participants
            .get_mut(&participant_id)
            .ok_or_else(|| CoreError::MalformedInput("unknown participant".into()))?;
        if participant.blinded_commitment.is_some() {
            return Err(CoreError::Protocol(
                "blinded commitment already submitted".into(),
            ));
        }
        participant.blinded_commitment = Some(blinded);

        let all_submitted = session
            .participants
            .values()
            .all(|p| p.blinded_commitment.is_some());
        if !all_submitted {
            return Ok(Vec::new());
        }

        // Every blinded value is signed exactly once.
        session.enter(SessionState::Signing, now, timeout);
        let mut outgoing = Vec::with_capacity(session.participants.len() + 1);
        for (&id, participant) in session.participants.iter() {
            let blinded = participant
                .blinded_commitment
                .as_ref()
                .expect("checked above");
            let signature = self.key.sign_blinded(blinded)?;
            outgoing.push(Outgoing::Direct {
                participant_id: id,
                message: CoordinatorMessage::BlindSignature {
                    signature: signature.to_str_radix(10),
                },
            });
        }
        session.enter(SessionState::CollectingUnblinded, now, timeout);
        outgoing.push(Outgoing::Broadcast(
            CoordinatorMessage::RequestUnblindedCommitment,
        ));
        Ok(outgoing)
    }

    /// Accept an unblinded (commitment, signature) pair on a fresh channel.
    /// No participant id is taken: the submission must not be linkable to
    /// the blinded phase.
    pub fn submit_unblinded(
        &mut self,
        session_id: SessionId,
        commitment: BigUint,
        blind_signature: BigUint,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        let timeout = self.config.session_timeout_secs;
        let public_key = self.key.public_key()?;
        let session = self.session_mut(session_id)?;
        session.ensure_phase(SessionState::CollectingUnblinded)?;
        if !blindsig::verify(&commitment, &blind_signature, &public_key) {
            warn!(session = session_id, "discarding unblinded commitment with bad signature");
            return Err(CoreError::InvalidSignature);
        }
        if session.unblinded.iter().any(|(c, _)| *c == commitment) {
            return Err(CoreError::Protocol("duplicate commitment".into()));
        }
        session.unblinded.push((commitment, blind_signature));

        if session.unblinded.len() < session.participants.len() {
            return Ok(Vec::new());
        }
        Self::start_building(session, now, timeout)
    }

    fn start_building(session: &mut Session, now: i64, timeout: i64) -> CoreResult<Vec<Outgoing>> {
        session.enter(SessionState::BuildingTransaction, now, timeout);
        Ok(vec![
            Outgoing::Broadcast(CoordinatorMessage::CommitmentsCollected {
                count: session.unblinded.len(),
            }),
            Outgoing::Broadcast(CoordinatorMessage::RequestInputAddress),
        ])
    }

    /// Record a participant's funding address; assembles the transaction
    /// once all addresses are in.
    pub fn submit_input(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
        address: String,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        let timeout = self.config.session_timeout_secs;
        let session = self.session_mut(session_id)?;
        session.ensure_phase(SessionState::BuildingTransaction)?;
        let participant = session
            .participants
            .get_mut(&participant_id)
            .ok_or_else(|| CoreError::MalformedInput("unknown participant".into()))?;
        participant.input_address = Some(address);

        let all_in = session
            .participants
            .values()
            .all(|p| p.input_address.is_some());
        if !all_in {
            return Ok(Vec::new());
        }

        // Uniform Fisher-Yates shuffle decouples output order from both the
        // join order and the unblinded arrival order.
        let mut outputs: Vec<String> = session
            .unblinded
            .iter()
            .map(|(c, _)| c.to_str_radix(10))
            .collect();
        outputs.shuffle(&mut OsRng);

        let inputs: Vec<String> = session
            .join_order
            .iter()
            .filter_map(|id| {
                session
                    .participants
                    .get(id)
                    .and_then(|p| p.input_address.clone())
            })
            .collect();

        let transaction = WireTransaction {
            session_id: session.id,
            denomination: session.denomination,
            inputs,
            outputs,
        };
        session.transaction = Some(transaction.clone());
        session.enter(SessionState::SigningTransaction, now, timeout);
        Ok(vec![
            Outgoing::Broadcast(CoordinatorMessage::TransactionReady { transaction }),
            Outgoing::Broadcast(CoordinatorMessage::RequestSignature),
        ])
    }

    /// Collect a participant's input signature over the joint transaction.
    pub fn submit_signature(
        &mut self,
        session_id: SessionId,
        participant_id: ParticipantId,
        signature: String,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        let timeout = self.config.session_timeout_secs;
        let session = self.session_mut(session_id)?;
        session.ensure_phase(SessionState::SigningTransaction)?;
        let participant = session
            .participants
            .get_mut(&participant_id)
            .ok_or_else(|| CoreError::MalformedInput("unknown participant".into()))?;
        participant.input_signature = Some(signature);

        let all_signed = session
            .participants
            .values()
            .all(|p| p.input_signature.is_some());
        if all_signed {
            session.enter(SessionState::Broadcasting, now, timeout);
        }
        Ok(Vec::new())
    }

    /// Report the outcome of a broadcast attempt.
    pub fn mark_broadcast(
        &mut self,
        session_id: SessionId,
        success: bool,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        let timeout = self.config.session_timeout_secs;
        let session = self.session_mut(session_id)?;
        session.ensure_phase(SessionState::Broadcasting)?;
        if success {
            session.enter(SessionState::Completed, now, timeout);
            return Ok(vec![Outgoing::Broadcast(
                CoordinatorMessage::TransactionComplete,
            )]);
        }
        session.broadcast_attempts += 1;
        if session.broadcast_attempts >= MAX_BROADCAST_ATTEMPTS {
            session.enter(SessionState::Failed, now, timeout);
            return Ok(vec![Outgoing::Broadcast(CoordinatorMessage::Error {
                message: "broadcast retry budget exhausted".into(),
            })]);
        }
        Ok(Vec::new())
    }

    /// Abort a live session, notifying all participants with the reason.
    pub fn abort(
        &mut self,
        session_id: SessionId,
        reason: &str,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        let timeout = self.config.session_timeout_secs;
        let session = self.session_mut(session_id)?;
        if session.state.is_terminal() {
            return Err(CoreError::Protocol("session already terminal".into()));
        }
        warn!(session = session_id, reason, "session aborted");
        session.enter(SessionState::Aborted, now, timeout);
        Ok(vec![Outgoing::Broadcast(
            CoordinatorMessage::SessionAborted {
                reason: reason.to_string(),
            },
        )])
    }

    /// Drive deadlines. Call periodically; returns per-session notifications.
    pub fn tick(&mut self, now: i64) -> Vec<(SessionId, Vec<Outgoing>)> {
        let timeout = self.config.session_timeout_secs;
        let min = self.config.min_participants;
        let mut events = Vec::new();

        for session in self.sessions.values_mut() {
            if session.state.is_terminal() || now <= session.phase_deadline {
                continue;
            }
            match session.state {
                // Enough unblinded commitments arrived; carry on without
                // the stragglers.
                SessionState::CollectingUnblinded if session.unblinded.len() >= min => {
                    let outgoing =
                        Self::start_building(session, now, timeout).unwrap_or_default();
                    events.push((session.id, outgoing));
                }
                // Missing input signatures are a failure, not an abort: the
                // transaction was already revealed.
                SessionState::SigningTransaction => {
                    session.enter(SessionState::Failed, now, timeout);
                    events.push((
                        session.id,
                        vec![Outgoing::Broadcast(CoordinatorMessage::Error {
                            message: "input signatures missing at deadline".into(),
                        })],
                    ));
                }
                state => {
                    let reason = format!("deadline exceeded in phase {}", state.name());
                    warn!(session = session.id, %reason, "session timed out");
                    session.enter(SessionState::Aborted, now, timeout);
                    events.push((
                        session.id,
                        vec![Outgoing::Broadcast(CoordinatorMessage::SessionAborted {
                            reason,
                        })],
                    ));
                }
            }
        }
        events
    }

    /// Dispatch a raw client message. Phases that identify the sender take
    /// the participant id assigned at join; the unblinded submission
    /// deliberately does not.
    pub fn handle_message(
        &mut self,
        session_id: SessionId,
        participant_id: Option<ParticipantId>,
        message: ClientMessage,
        now: i64,
    ) -> CoreResult<Vec<Outgoing>> {
        match message {
            ClientMessage::Join {
                denomination,
                public_key,
                timestamp,
                nonce,
                signature,
            } => {
                let submission = JoinSubmission {
                    denomination,
                    public_key: decode_bs58_32(&public_key)?,
                    timestamp,
                    nonce: decode_hex_32(&nonce)?,
                    signature: decode_base64_64(&signature)?,
                };
                self.join(session_id, &submission, now)
                    .map(|(_, outgoing)| outgoing)
            }
            ClientMessage::SubmitBlinded { blinded_commitment } => {
                let participant_id = require_participant(participant_id)?;
                let blinded = parse_biguint(&blinded_commitment)?;
                self.submit_blinded(session_id, participant_id, blinded, now)
            }
            ClientMessage::SubmitUnblinded {
                commitment,
                blind_signature,
            } => self.submit_unblinded(
                session_id,
                parse_biguint(&commitment)?,
                parse_biguint(&blind_signature)?,
                now,
            ),
            ClientMessage::SubmitInput { address } => {
                let participant_id = require_participant(participant_id)?;
                self.submit_input(session_id, participant_id, address, now)
            }
            ClientMessage::SubmitSignature { signature } => {
                let participant_id = require_participant(participant_id)?;
                self.submit_signature(session_id, participant_id, signature, now)
            }
            ClientMessage::Ready => Ok(Vec::new()),
            ClientMessage::Abort => self.abort(session_id, "participant abort", now),
        }
    }

    /// Release the state of completed, failed and aborted sessions.
    pub fn prune_terminal(&mut self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.state.is_terminal());
        before - self.sessions.len()
    }

    fn session_mut(&mut self, id: SessionId) -> CoreResult<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| CoreError::MalformedInput(format!("unknown session {id}")))
    }
}

fn require_participant(id: Option<ParticipantId>) -> CoreResult<ParticipantId> {
    id.ok_or_else(|| CoreError::Protocol("message requires a participant id".into()))
}

fn decode_bs58_32(s: &str) -> CoreResult<[u8; 32]> {
    let raw = bs58::decode(s)
        .into_vec()
        .map_err(|e| CoreError::MalformedInput(format!("bad base58: {e}")))?;
    raw.try_into()
        .map_err(|_| CoreError::MalformedInput("expected 32 bytes".into()))
}

fn decode_hex_32(s: &str) -> CoreResult<[u8; 32]> {
    let raw =
        hex::decode(s).map_err(|e| CoreError::MalformedInput(format!("bad hex: {e}")))?;
    raw.try_into()
        .map_err(|_| CoreError::MalformedInput("expected 32 bytes".into()))
}

fn decode_base64_64(s: &str) -> CoreResult<[u8; 64]> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| CoreError::MalformedInput(format!("bad base64: {e}")))?;
    raw.try_into()
        .map_err(|_| CoreError::MalformedInput("expected 64 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blindsig::{blind, hash_to_rsa, keypair_from_primes, unblind, verify};
    use crate::stealth::keys::keypair_from_seed;

    const NOW: i64 = 1_700_000_000;

    fn test_config(min: usize, max: usize) -> CoreConfig {
        CoreConfig {
            min_participants: min,
            max_participants: max,
            ..CoreConfig::default()
        }
    }

    fn coordinator(min: usize, max: usize) -> Coordinator {
        let key = keypair_from_primes(2_147_483_647, 4_294_967_311);
        Coordinator::new(test_config(min, max), CoordinatorKey::Single(key)).unwrap()
    }

    fn wallet(i: u8) -> ed25519_dalek::Keypair {
        keypair_from_seed(&[i; 32]).unwrap()
    }

    fn join_n(coordinator: &mut Coordinator, session: SessionId, n: u8) -> Vec<ParticipantId> {
        (0..n)
            .map(|i| {
                let submission =
                    JoinSubmission::create(&wallet(i + 1), 1, NOW);
                coordinator.join(session, &submission, NOW).unwrap().0
            })
            .collect()
    }

    #[test]
    fn session_starts_at_min_participants() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::Waiting
        );

        let submission = JoinSubmission::create(&wallet(1), 1, NOW);
        coordinator.join(session, &submission, NOW).unwrap();
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::Waiting
        );

        let submission = JoinSubmission::create(&wallet(2), 1, NOW);
        let (_, outgoing) = coordinator.join(session, &submission, NOW).unwrap();
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::CollectingBlinded
        );
        assert!(outgoing
            .iter()
            .any(|o| matches!(o, Outgoing::Broadcast(CoordinatorMessage::SessionStarting))));
    }

    #[test]
    fn join_rejects_bad_signature_wrong_denomination_and_stale_timestamp() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();

        let mut submission = JoinSubmission::create(&wallet(1), 1, NOW);
        submission.signature[0] ^= 0xff;
        assert_eq!(
            coordinator.join(session, &submission, NOW).unwrap_err(),
            CoreError::InvalidSignature
        );

        let submission = JoinSubmission::create(&wallet(1), 10, NOW);
        assert_eq!(
            coordinator.join(session, &submission, NOW).unwrap_err(),
            CoreError::InvalidDenomination(10)
        );

        let submission = JoinSubmission::create(&wallet(1), 1, NOW - 400);
        assert_eq!(
            coordinator.join(session, &submission, NOW).unwrap_err(),
            CoreError::SessionExpired
        );
    }

    #[test]
    fn join_rejects_a_wallet_key_joining_twice() {
        let mut coordinator = coordinator(3, 5);
        let session = coordinator.create_session(1, NOW).unwrap();
        let submission = JoinSubmission::create(&wallet(1), 1, NOW);
        coordinator.join(session, &submission, NOW).unwrap();

        let again = JoinSubmission::create(&wallet(1), 1, NOW);
        assert!(matches!(
            coordinator.join(session, &again, NOW).unwrap_err(),
            CoreError::Protocol(_)
        ));
    }

    #[test]
    fn join_rejects_when_full() {
        let mut coordinator = coordinator(2, 2);
        let session = coordinator.create_session(1, NOW).unwrap();
        join_n(&mut coordinator, session, 2);

        let submission = JoinSubmission::create(&wallet(9), 1, NOW);
        assert_eq!(
            coordinator.join(session, &submission, NOW).unwrap_err(),
            CoreError::SessionFull
        );
    }

    #[test]
    fn full_session_flow_assembles_a_shuffled_transaction() {
        let mut coordinator = coordinator(3, 5);
        let session = coordinator.create_session(1, NOW).unwrap();
        let participants = join_n(&mut coordinator, session, 3);
        let public_key = coordinator.signing_public_key();

        // Each participant blinds a distinct commitment.
        let mut plans = Vec::new();
        for (i, &pid) in participants.iter().enumerate() {
            let commitment = hash_to_rsa(format!("commitment-{i}").as_bytes(), &public_key.n);
            let (blinded, r) = blind(&commitment, &public_key).unwrap();
            plans.push((pid, commitment, blinded, r));
        }

        // Submit blinded values; the last submission yields the signatures.
        let mut blind_signatures: HashMap<ParticipantId, BigUint> = HashMap::new();
        for (pid, _, blinded, _) in &plans {
            let outgoing = coordinator
                .submit_blinded(session, *pid, blinded.clone(), NOW)
                .unwrap();
            for o in outgoing {
                if let Outgoing::Direct {
                    participant_id,
                    message: CoordinatorMessage::BlindSignature { signature },
                } = o
                {
                    blind_signatures
                        .insert(participant_id, parse_biguint(&signature).unwrap());
                }
            }
        }
        assert_eq!(blind_signatures.len(), 3);
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::CollectingUnblinded
        );

        // Unblind and resubmit over the pseudonymous channel.
        for (pid, commitment, _, r) in &plans {
            let signature =
                unblind(&blind_signatures[pid], r, &public_key.n).unwrap();
            assert!(verify(commitment, &signature, &public_key));
            coordinator
                .submit_unblinded(session, commitment.clone(), signature, NOW)
                .unwrap();
        }
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::BuildingTransaction
        );

        // Funding addresses trigger assembly.
        for (i, &pid) in participants.iter().enumerate() {
            coordinator
                .submit_input(session, pid, format!("input-address-{i}"), NOW)
                .unwrap();
        }
        let tx = coordinator
            .session(session)
            .unwrap()
            .transaction()
            .unwrap()
            .clone();
        assert_eq!(tx.outputs.len(), 3);
        let mut expected: Vec<String> = plans
            .iter()
            .map(|(_, c, _, _)| c.to_str_radix(10))
            .collect();
        let mut actual = tx.outputs.clone();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);

        // Signatures, broadcast, completion.
        for &pid in &participants {
            coordinator
                .submit_signature(session, pid, "sig".into(), NOW)
                .unwrap();
        }
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::Broadcasting
        );
        let outgoing = coordinator.mark_broadcast(session, true, NOW).unwrap();
        assert!(outgoing
            .iter()
            .any(|o| matches!(o, Outgoing::Broadcast(CoordinatorMessage::TransactionComplete))));
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::Completed
        );
    }

    #[test]
    fn unblinded_submission_with_invalid_signature_is_discarded() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();
        let participants = join_n(&mut coordinator, session, 2);
        let public_key = coordinator.signing_public_key();

        for (i, &pid) in participants.iter().enumerate() {
            let commitment = hash_to_rsa(format!("c{i}").as_bytes(), &public_key.n);
            let (blinded, _) = blind(&commitment, &public_key).unwrap();
            coordinator
                .submit_blinded(session, pid, blinded, NOW)
                .unwrap();
        }

        let commitment = hash_to_rsa(b"c0", &public_key.n);
        let forged = BigUint::from(12_345u32);
        assert_eq!(
            coordinator
                .submit_unblinded(session, commitment, forged, NOW)
                .unwrap_err(),
            CoreError::InvalidSignature
        );
        assert_eq!(coordinator.session(session).unwrap().unblinded_count(), 0);
    }

    #[test]
    fn duplicate_blinded_submission_is_rejected() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();
        let participants = join_n(&mut coordinator, session, 2);
        let public_key = coordinator.signing_public_key();

        let commitment = hash_to_rsa(b"c", &public_key.n);
        let (blinded, _) = blind(&commitment, &public_key).unwrap();
        coordinator
            .submit_blinded(session, participants[0], blinded.clone(), NOW)
            .unwrap();
        assert!(matches!(
            coordinator
                .submit_blinded(session, participants[0], blinded, NOW)
                .unwrap_err(),
            CoreError::Protocol(_)
        ));
    }

    #[test]
    fn deadline_in_waiting_aborts_the_session() {
        let mut coordinator = coordinator(3, 5);
        let session = coordinator.create_session(1, NOW).unwrap();
        join_n(&mut coordinator, session, 1);

        let events = coordinator.tick(NOW + 301);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].1[0],
            Outgoing::Broadcast(CoordinatorMessage::SessionAborted { .. })
        ));
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::Aborted
        );
    }

    #[test]
    fn deadline_with_quorum_of_unblinded_proceeds() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();
        let participants = join_n(&mut coordinator, session, 3);
        let public_key = coordinator.signing_public_key();

        let mut plans = Vec::new();
        for (i, &pid) in participants.iter().enumerate() {
            let commitment = hash_to_rsa(format!("c{i}").as_bytes(), &public_key.n);
            let (blinded, r) = blind(&commitment, &public_key).unwrap();
            plans.push((pid, commitment, blinded, r));
        }
        let mut signatures: HashMap<ParticipantId, BigUint> = HashMap::new();
        for (pid, _, blinded, _) in &plans {
            for o in coordinator
                .submit_blinded(session, *pid, blinded.clone(), NOW)
                .unwrap()
            {
                if let Outgoing::Direct {
                    participant_id,
                    message: CoordinatorMessage::BlindSignature { signature },
                } = o
                {
                    signatures.insert(participant_id, parse_biguint(&signature).unwrap());
                }
            }
        }

        // Only two of three resubmit before the deadline.
        for (pid, commitment, _, r) in plans.iter().take(2) {
            let signature = unblind(&signatures[pid], r, &public_key.n).unwrap();
            coordinator
                .submit_unblinded(session, commitment.clone(), signature, NOW)
                .unwrap();
        }

        let events = coordinator.tick(NOW + 301);
        assert_eq!(events.len(), 1);
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::BuildingTransaction
        );
    }

    #[test]
    fn missing_input_signatures_fail_the_session() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();
        let participants = join_n(&mut coordinator, session, 2);
        let public_key = coordinator.signing_public_key();

        let mut plans = Vec::new();
        for (i, &pid) in participants.iter().enumerate() {
            let commitment = hash_to_rsa(format!("c{i}").as_bytes(), &public_key.n);
            let (blinded, r) = blind(&commitment, &public_key).unwrap();
            plans.push((pid, commitment, blinded, r));
        }
        let mut signatures: HashMap<ParticipantId, BigUint> = HashMap::new();
        for (pid, _, blinded, _) in &plans {
            for o in coordinator
                .submit_blinded(session, *pid, blinded.clone(), NOW)
                .unwrap()
            {
                if let Outgoing::Direct {
                    participant_id,
                    message: CoordinatorMessage::BlindSignature { signature },
                } = o
                {
                    signatures.insert(participant_id, parse_biguint(&signature).unwrap());
                }
            }
        }
        for (pid, commitment, _, r) in &plans {
            let signature = unblind(&signatures[pid], r, &public_key.n).unwrap();
            coordinator
                .submit_unblinded(session, commitment.clone(), signature, NOW)
                .unwrap();
        }
        for &pid in &participants {
            coordinator
                .submit_input(session, pid, "addr".into(), NOW)
                .unwrap();
        }
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::SigningTransaction
        );

        // Nobody signs; the deadline fails the session.
        let events = coordinator.tick(NOW + 301);
        assert_eq!(events.len(), 1);
        assert_eq!(
            coordinator.session(session).unwrap().state(),
            SessionState::Failed
        );
    }

    #[test]
    fn participant_abort_notifies_everyone() {
        let mut coordinator = coordinator(2, 4);
        let session = coordinator.create_session(1, NOW).unwrap();
        join_n(&mut coordinator, session, 2);

        let outgoing = coordinator
            .handle_message(session, None, ClientMessage::Abort, NOW)
            .unwrap();
        assert!(matches!(
            outgoing[0],
            Outgoing::Broadcast(CoordinatorMessage::SessionAborted { .. })
        ));
        // Aborting twice is a protocol error.
        assert!(coordinator.abort(session, "again", NOW).is_err());

        // Late submissions land on the aborted-session error.
        assert!(matches!(
            coordinator
                .submit_unblinded(session, BigUint::from(1u8), BigUint::from(1u8), NOW)
                .unwrap_err(),
            CoreError::SessionAborted(_)
        ));

        // Terminal sessions can be pruned, releasing their state.
        assert_eq!(coordinator.prune_terminal(), 1);
        assert!(coordinator.session(session).is_none());
    }

    #[test]
    fn threshold_coordinator_key_signs_via_shares() {
        use crate::threshold::split_secret;

        let key = keypair_from_primes(2_147_483_647, 4_294_967_311);
        let shares = split_secret(
            key.private_exponent(),
            2,
            3,
            key.public_key(),
        )
        .unwrap();
        let threshold_key = CoordinatorKey::Threshold {
            shares,
            threshold: 2,
        };
        let blinded = BigUint::from(987_654_321u64);
        // The placeholder combination must at least be deterministic and
        // in-range; RSA validity needs the complete scheme.
        let a = threshold_key.sign_blinded(&blinded).unwrap();
        let b = threshold_key.sign_blinded(&blinded).unwrap();
        assert_eq!(a, b);
        assert!(a < threshold_key.public_key().unwrap().n);
    }
}
