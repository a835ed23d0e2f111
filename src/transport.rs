//! Peer transport and wire encoding.
//!
//! Commands travel as `name|arg0,arg1,...`. Control signals reuse the same
//! shape with reserved names and no arguments (`FINISH|`, `UNLOCK|`,
//! `RUN|`). There is no escaping: names and arguments must not contain `|`
//! or `,`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::command::{Command, CommandBase};

const SIGNAL_FINISH: &str = "FINISH";
const SIGNAL_UNLOCK: &str = "UNLOCK";
const SIGNAL_RUN: &str = "RUN";

/// Whether a command name collides with a control signal.
pub fn is_reserved_name(name: &str) -> bool {
    matches!(name, SIGNAL_FINISH | SIGNAL_UNLOCK | SIGNAL_RUN)
}

/// One message exchanged between paired devices.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// A leaf command the peer should replay on its rival avatar.
    Command(CommandBase),
    /// The peer completed (or abandoned) its run.
    Finish,
    /// The peer releases this side's lock.
    Unlock,
    /// The peer asks for a synchronized run start.
    Run,
}

impl PeerMessage {
    /// Build a command message. Loops are never sent; only the leaf
    /// commands they expand to.
    pub fn command(command: &Command) -> Option<PeerMessage> {
        match command {
            Command::Leaf(base) => Some(PeerMessage::Command(CommandBase::new(
                base.name.clone(),
                base.args.clone(),
            ))),
            Command::Loop(_) => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            PeerMessage::Command(base) => format!("{}|{}", base.name, base.args.join(",")),
            PeerMessage::Finish => format!("{SIGNAL_FINISH}|"),
            PeerMessage::Unlock => format!("{SIGNAL_UNLOCK}|"),
            PeerMessage::Run => format!("{SIGNAL_RUN}|"),
        }
    }

    pub fn decode(wire: &str) -> Option<PeerMessage> {
        let wire = wire.trim_end_matches(['\r', '\n']);
        if wire.is_empty() {
            return None;
        }
        let (name, rest) = match wire.split_once('|') {
            Some((name, rest)) => (name, Some(rest)),
            None => (wire, None),
        };
        if name.is_empty() {
            return None;
        }
        match name {
            SIGNAL_FINISH => return Some(PeerMessage::Finish),
            SIGNAL_UNLOCK => return Some(PeerMessage::Unlock),
            SIGNAL_RUN => return Some(PeerMessage::Run),
            _ => {}
        }
        let args = match rest {
            Some(rest) if !rest.is_empty() => rest.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        };
        Some(PeerMessage::Command(CommandBase::new(name, args)))
    }
}

/// Best-effort delivery of messages to the paired peer.
pub trait Transport {
    fn broadcast(&mut self, message: &PeerMessage);
}

type Queue = Rc<RefCell<VecDeque<String>>>;

/// In-memory endpoint. Messages are queued in wire form, FIFO per direction.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    outbox: Queue,
    inbox: Queue,
}

impl LoopbackTransport {
    /// Two connected endpoints.
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let a: Queue = Rc::default();
        let b: Queue = Rc::default();
        (
            LoopbackTransport {
                outbox: a.clone(),
                inbox: b.clone(),
            },
            LoopbackTransport { outbox: b, inbox: a },
        )
    }

    /// Take every message that has arrived, dropping undecodable ones.
    pub fn drain_inbound(&self) -> Vec<PeerMessage> {
        let raw: Vec<String> = self.inbox.borrow_mut().drain(..).collect();
        raw.iter()
            .filter_map(|wire| {
                let decoded = PeerMessage::decode(wire);
                if decoded.is_none() {
                    log::warn!("Dropping undecodable peer message {:?}", wire);
                }
                decoded
            })
            .collect()
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbox.borrow().len()
    }
}

impl Transport for LoopbackTransport {
    fn broadcast(&mut self, message: &PeerMessage) {
        self.outbox.borrow_mut().push_back(message.encode());
    }
}
