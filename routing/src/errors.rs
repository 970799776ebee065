// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The error results used by this library.

use crate::rib::nhgstore::NhgId;
use crate::rib::table::TableKey;
use ipnet::IpNet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RouterError {
    /* not found */
    #[error("No table {0}")]
    NoSuchTable(TableKey),

    #[error("No nexthop-group with id {0}")]
    NoSuchNhg(NhgId),

    /* transient: absorbed by the retry / reconnect machinery */
    #[error("Table {0} is busy")]
    TableBusy(TableKey),

    #[error("MLAG IO failure: {0}")]
    MlagIo(String),

    /* malformed */
    #[error("Malformed table key {0}")]
    MalformedKey(TableKey),

    #[error("Prefix {prefix} does not belong to table {key}")]
    AfiMismatch { key: TableKey, prefix: IpNet },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /* terminal */
    #[error("Router is shutting down")]
    ShuttingDown,

    #[error("MLAG channel is closed")]
    MlagClosed,

    /* plumbing */
    #[error("Invalid socket path '{0}'")]
    InvalidPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("Sweep timer was already armed")]
    SweepAlreadyArmed,

    #[error("Internal error: {0}")]
    Internal(&'static str),
}

impl RouterError {
    /// Tell if an error is a transient condition that deserves a retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, RouterError::TableBusy(_) | RouterError::MlagIo(_))
    }

    /// Tell if an error is the result of an operation attempted after shutdown
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouterError::ShuttingDown | RouterError::MlagClosed)
    }
}
