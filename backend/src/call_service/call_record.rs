// SPDX-FileCopyrightText: 2025 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use whispertypes::identifiers::{CallId, WhisperId};
use whispertypes::messages::client_call::CallEndReason;
use whispertypes::time::TimeStamp;

/// Live call state expires after this many seconds; any non-terminal call
/// older than that is timed out.
pub const CALL_TTL_SECS: i64 = 180;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiated => "initiated",
            CallState::Ringing => "ringing",
            CallState::Answered => "answered",
            CallState::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }
}

impl std::str::FromStr for CallState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(CallState::Initiated),
            "ringing" => Ok(CallState::Ringing),
            "answered" => Ok(CallState::Answered),
            "ended" => Ok(CallState::Ended),
            _ => Err(()),
        }
    }
}

/// Volatile mirror of a call in flight, keyed `call:<callId>`.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct LiveCall {
    pub call_id: CallId,
    pub caller_id: WhisperId,
    pub callee_id: WhisperId,
    pub state: CallState,
    pub is_video: bool,
    pub created_at: TimeStamp,
    pub answered_at: Option<TimeStamp>,
}

/// Durable call history row, written once a call reaches a terminal
/// state.
#[derive(Clone, Debug)]
#[cfg_attr(test, derive(PartialEq))]
pub struct CallRecord {
    pub call_id: CallId,
    pub caller_id: WhisperId,
    pub callee_id: WhisperId,
    pub state: CallState,
    pub is_video: bool,
    pub created_at: TimeStamp,
    pub answered_at: Option<TimeStamp>,
    pub ended_at: Option<TimeStamp>,
    pub end_reason: Option<CallEndReason>,
}

impl LiveCall {
    pub fn into_record(
        self,
        ended_at: TimeStamp,
        end_reason: CallEndReason,
    ) -> CallRecord {
        CallRecord {
            call_id: self.call_id,
            caller_id: self.caller_id,
            callee_id: self.callee_id,
            state: CallState::Ended,
            is_video: self.is_video,
            created_at: self.created_at,
            answered_at: self.answered_at,
            ended_at: Some(ended_at),
            end_reason: Some(end_reason),
        }
    }

    pub fn peer_of(&self, actor: &WhisperId) -> Option<&WhisperId> {
        if &self.caller_id == actor {
            Some(&self.callee_id)
        } else if &self.callee_id == actor {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}
