//! Actions
//!
//! Actions are one-shot messages that travel along the edges of a graph, as
//! opposed to properties, which the graph keeps consistent. A node either
//! handles an incoming action with a handler registered for its key, or
//! passes it on according to its action forwarding policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::forwarding::ForwardingPolicy;
use super::Node;
use crate::error::Result;
use crate::property::{SourceInfo, SourceKind};

/// Key of stream command actions.
pub const STREAM_CMD_KEY: &str = "stream_cmd";
/// Key of receive-side event actions.
pub const RX_EVENT_KEY: &str = "rx_event";
/// Key of transmit-side event actions.
pub const TX_EVENT_KEY: &str = "tx_event";

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(0);

/// Handler invoked when an action with a matching key arrives at a node.
pub type ActionHandler = Box<dyn FnMut(&mut Node, SourceInfo, Arc<Action>) -> Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    StartContinuous,
    StopContinuous,
    NumSampsAndDone,
    NumSampsAndMore,
}

/// Start or stop streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCommand {
    pub mode: StreamMode,
    /// Number of samples for the finite modes.
    pub num_samps: u64,
    pub stream_now: bool,
    /// Start time in seconds, used when `stream_now` is false.
    pub time: Option<f64>,
}

impl StreamCommand {
    /// Stream until told to stop.
    pub fn start_continuous() -> Self {
        Self {
            mode: StreamMode::StartContinuous,
            num_samps: 0,
            stream_now: true,
            time: None,
        }
    }

    /// Stop a continuous stream.
    pub fn stop_continuous() -> Self {
        Self {
            mode: StreamMode::StopContinuous,
            ..Self::start_continuous()
        }
    }

    /// Stream `num_samps` samples, then stop.
    pub fn num_samps_and_done(num_samps: u64) -> Self {
        Self {
            mode: StreamMode::NumSampsAndDone,
            num_samps,
            ..Self::start_continuous()
        }
    }

    /// Start at `time` seconds instead of now.
    pub fn at(mut self, time: f64) -> Self {
        self.stream_now = false;
        self.time = Some(time);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxEventCode {
    Timeout,
    LateCommand,
    BrokenChain,
    Overflow,
    Alignment,
    BadPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxEventCode {
    BurstAck,
    Underflow,
    SeqError,
    TimeError,
    UnderflowInPacket,
    SeqErrorInBurst,
}

/// Payload carried by an [`Action`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    #[default]
    None,
    Bytes { data: Vec<u8> },
    StreamCommand(StreamCommand),
    RxEvent { code: RxEventCode },
    TxEvent { code: TxEventCode, timestamp: Option<f64> },
}

/// A keyed message routed across the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    id: u64,
    key: String,
    payload: ActionPayload,
}

impl Action {
    /// Create an action with an empty payload.
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_payload(key, ActionPayload::None)
    }

    /// Create an action carrying `payload`.
    pub fn with_payload(key: impl Into<String>, payload: ActionPayload) -> Self {
        Self {
            id: NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed),
            key: key.into(),
            payload,
        }
    }

    /// A `stream_cmd` action.
    pub fn stream_command(command: StreamCommand) -> Self {
        Self::with_payload(STREAM_CMD_KEY, ActionPayload::StreamCommand(command))
    }

    /// An `rx_event` action reporting `code`.
    pub fn rx_event(code: RxEventCode) -> Self {
        Self::with_payload(RX_EVENT_KEY, ActionPayload::RxEvent { code })
    }

    /// A `tx_event` action reporting `code`, optionally timestamped.
    pub fn tx_event(code: TxEventCode, timestamp: Option<f64>) -> Self {
        Self::with_payload(TX_EVENT_KEY, ActionPayload::TxEvent { code, timestamp })
    }

    /// Process-wide unique, increasing id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The key handlers are looked up by.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// What the action carries.
    pub fn payload(&self) -> &ActionPayload {
        &self.payload
    }
}

impl Node {
    /// Register a handler for actions with the given key, replacing any
    /// earlier handler for that key.
    pub fn register_action_handler<F>(&mut self, key: impl Into<String>, handler: F)
    where
        F: FnMut(&mut Node, SourceInfo, Arc<Action>) -> Result<()> + Send + 'static,
    {
        self.action_handlers.insert(key.into(), Box::new(handler));
    }

    /// Deliver an action that arrived on `source`.
    ///
    /// Without a handler for its key, the action is passed on per the action
    /// forwarding policy. Actions addressed to the node itself are never
    /// passed on.
    pub(crate) fn receive_action(&mut self, source: SourceInfo, action: Arc<Action>) -> Result<()> {
        if let Some((position, key, mut handler)) = self.action_handlers.shift_remove_full(action.key()) {
            let result = handler(self, source, Arc::clone(&action));
            // A handler may have replaced itself while running.
            let last = self.action_handlers.len();
            match self.action_handlers.get_index_of(&key) {
                Some(current) => self.action_handlers.move_index(current, position.min(last - 1)),
                None => {
                    self.action_handlers.shift_insert(position.min(last), key, handler);
                }
            }
            return result;
        }

        if source.kind == SourceKind::User {
            trace!(node = %self.unique_id, key = %action.key(), id = action.id(), "dropping user action");
            return Ok(());
        }

        let policy = self.action_policy(action.key());
        let targets = self.forwarding_targets(policy, source, &self.action_map, "action")?;
        if targets.is_empty() {
            trace!(node = %self.unique_id, key = %action.key(), %source, "dropping action");
        }
        for target in targets {
            trace!(node = %self.unique_id, key = %action.key(), %target, "forwarding action");
            self.outbox.push((target, Arc::clone(&action)));
        }
        Ok(())
    }

    fn action_policy(&self, key: &str) -> ForwardingPolicy {
        self.action_policies
            .get(key)
            .or_else(|| self.action_policies.get(""))
            .copied()
            .unwrap_or_default()
    }
}
