//! Scripted conversation over a simulated link.

use halyard_core::{DecryptError, Environment, SessionConfig};
use halyard_harness::{ChannelConfig, Conversation, Side, SimChannel};
use halyard_proto::EncryptedMessage;

use crate::CliError;

/// What to simulate.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    /// Messages to send in total, split between both sides.
    pub messages: u32,
    /// Link behaviour, applied to both directions.
    pub channel: ChannelConfig,
    /// Seed for the link's fault decisions.
    pub channel_seed: u64,
    /// One-time prekeys Bob publishes before the handshake.
    pub one_time_prekeys: u32,
    /// Session limits for both peers.
    pub session: SessionConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            messages: 100,
            channel: ChannelConfig::default(),
            channel_seed: 0,
            one_time_prekeys: 1,
            session: SessionConfig::default(),
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Messages encrypted.
    pub sent: u64,
    /// Messages decrypted.
    pub delivered: u64,
    /// Messages lost by the link.
    pub dropped: u64,
    /// Copies refused as already consumed.
    pub duplicates: u64,
    /// Items that failed to decode or authenticate.
    pub rejected: u64,
}

/// Runs a conversation and returns what happened to each message.
///
/// Every third message goes from Bob to Alice so both sides ratchet.
/// Returns an error only for fatal conditions; a session that needs
/// re-keying ends the run.
pub fn run_conversation<E: Environment>(env: E, config: &RunConfig) -> Result<RunReport, CliError> {
    let mut conversation = Conversation::establish(env, config.session, config.one_time_prekeys)?;
    tracing::info!(
        one_time_prekeys_left = conversation.bob_prekeys().one_time_prekey_count(),
        "handshake complete"
    );

    let mut to_bob = SimChannel::new(config.channel_seed, config.channel);
    let mut to_alice = SimChannel::new(config.channel_seed.wrapping_add(1), config.channel);
    let mut report = RunReport::default();

    for step in 0..config.messages {
        let from = if step % 3 == 2 { Side::Bob } else { Side::Alice };
        let plaintext = format!("{from:?} message {step}");
        let message = conversation.encrypt(from, plaintext.as_bytes())?;
        let wire = halyard_proto::encode(&message)?;
        report.sent += 1;

        match from {
            Side::Alice => to_bob.send(wire),
            Side::Bob => to_alice.send(wire),
        }

        if let Some(wire) = to_bob.deliver_next() {
            receive(&mut conversation, Side::Bob, &wire, &mut report)?;
        }
        if let Some(wire) = to_alice.deliver_next() {
            receive(&mut conversation, Side::Alice, &wire, &mut report)?;
        }
    }

    for wire in to_bob.drain() {
        receive(&mut conversation, Side::Bob, &wire, &mut report)?;
    }
    for wire in to_alice.drain() {
        receive(&mut conversation, Side::Alice, &wire, &mut report)?;
    }

    report.dropped = to_bob.stats().dropped + to_alice.stats().dropped;
    Ok(report)
}

fn receive<E: Environment>(
    conversation: &mut Conversation<E>,
    to: Side,
    wire: &[u8],
    report: &mut RunReport,
) -> Result<(), CliError> {
    let message: EncryptedMessage = match halyard_proto::decode(wire) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(?to, "undecodable message: {}", e);
            report.rejected += 1;
            return Ok(());
        },
    };

    match conversation.decrypt(to, &message) {
        Ok(_) => report.delivered += 1,
        Err(DecryptError::DuplicateOrUnknownMessage { .. }) => report.duplicates += 1,
        Err(e) if !e.is_fatal() => report.rejected += 1,
        Err(source) => {
            return Err(CliError::Decrypt { received: report.delivered + report.duplicates, source });
        },
    }
    Ok(())
}
