// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor API protocol for the Foreman scheduler.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod framing;
mod messages;

pub use framing::{decode, encode, read_message, write_message, ProtocolError, MAX_FRAME_LEN};
pub use messages::{
    EventList, ExecutorRequest, JobRunLease, LeaseRequest, LeaseStreamMessage, NodeInfo, SubmitJob,
};
