//! Gossip protocol messages and the rule for reconciling a peer's blocks
//! with the local chain.

use crate::{block::Block, error::RejectReason, transaction::Transaction};
use serde::{Deserialize, Serialize};

/// Wire record `{ "type": ..., "data": ... }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    QueryLatest,
    QueryAll,
    ResponseBlockchain(Vec<Block>),
    NewBlock(Block),
    NewTransaction(Transaction),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::QueryLatest => "QUERY_LATEST",
            Message::QueryAll => "QUERY_ALL",
            Message::ResponseBlockchain(_) => "RESPONSE_BLOCKCHAIN",
            Message::NewBlock(_) => "NEW_BLOCK",
            Message::NewTransaction(_) => "NEW_TRANSACTION",
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// What to do with a batch of blocks received from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncAction {
    /// The peer is not ahead of us.
    Ignore,
    /// The peer's head links directly onto ours.
    AppendHead(Block),
    /// The peer is ahead but only sent its head; ask for the full chain.
    QueryAll,
    /// The peer sent a longer history; run fork-choice on it.
    Replace(Vec<Block>),
}

/// Decide how to handle `received` given our current head.
pub fn plan_response(local_head: &Block, mut received: Vec<Block>) -> SyncAction {
    received.sort_by_key(|b| b.index);
    let Some(remote_head) = received.last() else {
        return SyncAction::Ignore;
    };
    if remote_head.index <= local_head.index {
        SyncAction::Ignore
    } else if remote_head.previous_hash == local_head.hash {
        let head = remote_head.clone();
        SyncAction::AppendHead(head)
    } else if received.len() == 1 {
        SyncAction::QueryAll
    } else {
        SyncAction::Replace(received)
    }
}

/// Result of `Chain::receive_blocks`, telling the transport what to send next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Ignored,
    /// Broadcast the new head to every peer.
    Appended(Block),
    /// Send `QUERY_ALL` back to the peer.
    NeedFullChain,
    /// Local chain was replaced; broadcast the new head.
    Replaced(Block),
    Rejected(RejectReason),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::CancelFlag;
    use chrono::Utc;

    fn next(prev: &Block) -> Block {
        let mut b = Block::create(prev.index + 1, Utc::now(), vec![], prev.hash, "m");
        assert!(b.mine(1, &CancelFlag::new()));
        b
    }

    #[test]
    fn message_wire_format() {
        assert_eq!(
            Message::QueryLatest.to_line().unwrap(),
            r#"{"type":"QUERY_LATEST"}"#
        );
        let parsed = Message::from_line(r#"{"type":"QUERY_ALL"}"#).unwrap();
        assert_eq!(parsed, Message::QueryAll);

        let genesis = Block::genesis(&[]);
        let msg = Message::ResponseBlockchain(vec![genesis.clone()]);
        let line = msg.to_line().unwrap();
        assert!(line.starts_with(r#"{"type":"RESPONSE_BLOCKCHAIN","data":[{"#));
        assert_eq!(Message::from_line(&line).unwrap(), msg);
        assert_eq!(msg.kind(), "RESPONSE_BLOCKCHAIN");
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(Message::from_line(r#"{"type":"GOSSIP_ALL"}"#).is_err());
        assert!(Message::from_line("not json").is_err());
    }

    #[test]
    fn plan_covers_every_branch() {
        let genesis = Block::genesis(&[]);
        let b1 = next(&genesis);
        let b2 = next(&b1);

        assert_eq!(plan_response(&genesis, vec![]), SyncAction::Ignore);
        assert_eq!(plan_response(&b1, vec![b1.clone()]), SyncAction::Ignore);
        assert_eq!(plan_response(&b2, vec![b1.clone()]), SyncAction::Ignore);

        assert_eq!(
            plan_response(&b1, vec![b2.clone()]),
            SyncAction::AppendHead(b2.clone())
        );
        assert_eq!(plan_response(&genesis, vec![b2.clone()]), SyncAction::QueryAll);

        // Out-of-order payloads are sorted before the head is picked.
        let full = vec![b2.clone(), genesis.clone(), b1.clone()];
        assert_eq!(
            plan_response(&genesis, full),
            SyncAction::Replace(vec![genesis, b1, b2])
        );
    }
}
