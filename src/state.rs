//! Group state fusion.
//!
//! The group state is computed in two steps:
//!
//! 1. the base aggregate over the member states, by priority
//!    `Fault > Alarm > Moving > Unknown > On`, where members that never reported
//!    count as `Unknown`;
//! 2. the fusion with the acquisition sub-engines: an idle or unknown group is
//!    reported `Moving` while the software synchronizer or the software or 0D
//!    acquisition paths are busy.
//!
//! Both steps are pure functions of their inputs so that concurrent
//! recomputations converge to the same result.

use crate::acquisition::SubEngineStatus;
use crate::config::Member;
use crate::defs::State;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status line appended while a software sub-engine keeps the group busy.
pub const SOFTWARE_SYNCHRONIZATION_STATUS: &str = "Software synchronization is in progress";

/// Last state reported by one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementStatus {
    /// Reported state
    pub state: State,
    /// Reported status text, possibly empty
    pub status: String,
}

impl ElementStatus {
    /// State with an empty status text.
    pub fn new(state: State) -> Self {
        Self {
            state,
            status: String::new(),
        }
    }
}

/// State and status lines of the group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupState {
    /// Fused state
    pub state: State,
    /// One line per member, plus the fusion line if any
    pub status: Vec<String>,
}

impl GroupState {
    /// Status lines joined with newlines.
    pub fn status_text(&self) -> String {
        self.status.join("\n")
    }
}

/// Priority rank used by the base aggregate; higher wins.
fn rank(state: State) -> u8 {
    match state {
        State::Fault => 4,
        State::Alarm => 3,
        State::Moving => 2,
        State::Unknown | State::Init => 1,
        State::On | State::Off | State::Standby | State::Disable => 0,
    }
}

fn bucket(state: State) -> State {
    match rank(state) {
        4 => State::Fault,
        3 => State::Alarm,
        2 => State::Moving,
        1 => State::Unknown,
        _ => State::On,
    }
}

/// Aggregate the member states.
///
/// An empty member list aggregates to `Unknown`.
pub fn base_state(members: &[Member], reported: &HashMap<String, ElementStatus>) -> GroupState {
    if members.is_empty() {
        return GroupState::default();
    }
    let mut state = State::On;
    let mut status = Vec::with_capacity(members.len());
    for member in members {
        let member_state = reported
            .get(&member.full_name)
            .map_or(State::Unknown, |reported| reported.state);
        if rank(member_state) > rank(state) {
            state = bucket(member_state);
        }
        match reported.get(&member.full_name) {
            Some(reported) if !reported.status.is_empty() => status.push(reported.status.clone()),
            _ => status.push(format!("{} is {}", member.full_name, member_state)),
        }
    }
    GroupState { state, status }
}

/// Force an idle group to `Moving` while a software sub-engine is busy.
pub fn fuse(base: GroupState, engines: SubEngineStatus) -> GroupState {
    let mut fused = base;
    if matches!(fused.state, State::On | State::Unknown) && engines.any_started() {
        fused.state = State::Moving;
        fused.status.push(SOFTWARE_SYNCHRONIZATION_STATUS.to_string());
    }
    fused
}

/// Base aggregate followed by the sub-engine fusion.
pub fn calculate_states(
    members: &[Member],
    reported: &HashMap<String, ElementStatus>,
    engines: SubEngineStatus,
) -> GroupState {
    fuse(base_state(members, reported), engines)
}
