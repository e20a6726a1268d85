// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reply kinds produced by the dispatcher, independent of wire framing.

use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

use crate::storage::traits::SlotRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`, `+PONG`
    Status(String),
    /// `-ERR ...` (the message includes its prefix)
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Nil,
    Array(Vec<Reply>),
}

impl Reply {
    #[must_use]
    pub fn ok() -> Self {
        Self::Status("OK".into())
    }

    #[must_use]
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error(msg.into())
    }

    #[must_use]
    pub fn wrong_arity(command: &str) -> Self {
        Self::Error(format!("ERR wrong number of arguments for '{}' command", command))
    }

    #[must_use]
    pub fn unknown_command(command: &str) -> Self {
        Self::Error(format!("ERR unknown command '{}'", command))
    }

    #[must_use]
    pub fn not_an_integer() -> Self {
        Self::Error("ERR value is not an integer or out of range".into())
    }

    #[must_use]
    pub fn bulk(value: impl Into<Bytes>) -> Self {
        Self::Bulk(value.into())
    }

    /// `CLUSTER SLOTS` shape: `[start, end, [ip, port, id], ...]` per range.
    #[must_use]
    pub fn from_slots(slots: &[SlotRange]) -> Self {
        Self::Array(
            slots
                .iter()
                .map(|range| {
                    let mut entry = vec![
                        Self::Integer(i64::from(range.start)),
                        Self::Integer(i64::from(range.end)),
                    ];
                    entry.extend(range.nodes.iter().map(|node| {
                        Self::Array(vec![
                            Self::bulk(node.ip.clone()),
                            Self::Integer(i64::from(node.port)),
                            Self::bulk(node.id.clone()),
                        ])
                    }));
                    Self::Array(entry)
                })
                .collect(),
        )
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Metric status label
    #[must_use]
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Nil => "nil",
            _ => "ok",
        }
    }

    /// Encode as a RESP2 frame.
    #[must_use]
    pub fn into_frame(self) -> BytesFrame {
        match self {
            Self::Status(s) => BytesFrame::SimpleString(Bytes::from(s.into_bytes())),
            Self::Error(e) => BytesFrame::Error(e.into()),
            Self::Integer(i) => BytesFrame::Integer(i),
            Self::Bulk(b) => BytesFrame::BulkString(b),
            Self::Nil => BytesFrame::Null,
            Self::Array(items) => BytesFrame::Array(items.into_iter().map(Self::into_frame).collect()),
        }
    }
}
