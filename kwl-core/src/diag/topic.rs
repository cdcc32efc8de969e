//! Bus topic front-end for the diagnostic commands.
//!
//! Topics may carry a device prefix (e.g. `d15/debugset/kwl/...`); everything
//! before the well-known path is ignored.

use core::fmt::{self, Write as _};

use heapless::String;

use super::grammar::{Command, StatsTarget};

/// Path for normal commands.
pub const COMMAND_PREFIX: &str = "/set/kwl/";
/// Path for debug commands.
pub const DEBUG_COMMAND_PREFIX: &str = "/debugset/kwl/";
/// Path for status values.
pub const STATE_PREFIX: &str = "/state/kwl/";
/// Path for debug status values.
pub const DEBUG_STATE_PREFIX: &str = "/debugstate/kwl/";

pub const SCHEDULER_GET: &str = "scheduler/getvalues";
pub const SCHEDULER_RESET: &str = "scheduler/resetvalues";
pub const SCHEDULER_STATE: &str = "scheduler/";
pub const CRASH_GET: &str = "crash/getvalues";
pub const CRASH_RESET: &str = "crash/resetvalues";
pub const CRASH_PROVOKE: &str = "crash/provoke_IKNOWWHATIMDOING";
pub const CRASH_STATE: &str = "crash/";
pub const RESTART: &str = "restart";

/// Longest response topic produced by [`stats_topic`] and [`crash_topic`].
pub const MAX_TOPIC_LEN: usize = 64;

pub type Topic = String<MAX_TOPIC_LEN>;

/// A known topic carried a payload that cannot name a stats group.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TopicError {
    InvalidPayload,
}

impl fmt::Display for TopicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicError::InvalidPayload => f.write_str("invalid payload"),
        }
    }
}

/// Maps an incoming message onto a diagnostic command.
///
/// Returns `None` for topics this surface does not handle.
#[must_use]
pub fn parse_topic<'a>(topic: &str, payload: &'a str) -> Option<Result<Command<'a>, TopicError>> {
    if let Some(command) = strip_path(topic, DEBUG_COMMAND_PREFIX) {
        return match command {
            SCHEDULER_GET => Some(stats_target(payload).map(Command::SchedulerStats)),
            SCHEDULER_RESET => Some(stats_target(payload).map(Command::SchedulerReset)),
            CRASH_GET => Some(Ok(Command::CrashList)),
            CRASH_RESET => Some(Ok(Command::CrashReset)),
            CRASH_PROVOKE => Some(Ok(Command::CrashProvoke)),
            _ => None,
        };
    }

    match strip_path(topic, COMMAND_PREFIX) {
        Some(RESTART) => Some(Ok(Command::Restart)),
        _ => None,
    }
}

fn strip_path<'t>(topic: &'t str, prefix: &str) -> Option<&'t str> {
    topic
        .find(prefix)
        .map(|index| &topic[index + prefix.len()..])
}

fn stats_target(payload: &str) -> Result<StatsTarget<'_>, TopicError> {
    let name = payload.trim();
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(StatsTarget::from_name(name))
    } else {
        Err(TopicError::InvalidPayload)
    }
}

/// Response topic for one stats group.
///
/// # Errors
///
/// Returns [`fmt::Error`] when the name does not fit [`MAX_TOPIC_LEN`].
pub fn stats_topic(group: &str) -> Result<Topic, fmt::Error> {
    let mut topic = Topic::new();
    write!(topic, "{DEBUG_STATE_PREFIX}{SCHEDULER_STATE}{group}")?;
    Ok(topic)
}

/// Response topic for the crash record at `index` (oldest is 0).
///
/// # Errors
///
/// Returns [`fmt::Error`] when the topic does not fit [`MAX_TOPIC_LEN`].
pub fn crash_topic(index: usize) -> Result<Topic, fmt::Error> {
    let mut topic = Topic::new();
    write!(topic, "{DEBUG_STATE_PREFIX}{CRASH_STATE}{index}")?;
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_debug_topics_with_device_prefix() {
        assert_eq!(
            parse_topic("d15/debugset/kwl/scheduler/getvalues", ""),
            Some(Ok(Command::SchedulerStats(StatsTarget::All)))
        );
        assert_eq!(
            parse_topic("/debugset/kwl/scheduler/resetvalues", "FanControl"),
            Some(Ok(Command::SchedulerReset(StatsTarget::Group("FanControl"))))
        );
        assert_eq!(
            parse_topic("/debugset/kwl/crash/provoke_IKNOWWHATIMDOING", "YES"),
            Some(Ok(Command::CrashProvoke))
        );
        assert_eq!(
            parse_topic("d15/set/kwl/restart", ""),
            Some(Ok(Command::Restart))
        );
    }

    #[test]
    fn unknown_topics_are_ignored() {
        assert_eq!(parse_topic("/debugset/kwl/crash/provoke", ""), None);
        assert_eq!(parse_topic("/set/kwl/lueftungsstufe", "2"), None);
        assert_eq!(parse_topic("/state/kwl/restart", ""), None);
    }

    #[test]
    fn invalid_group_payload_is_a_nak() {
        assert_eq!(
            parse_topic("/debugset/kwl/scheduler/getvalues", "Fan Control!"),
            Some(Err(TopicError::InvalidPayload))
        );
    }

    #[test]
    fn response_topics() {
        assert_eq!(
            stats_topic("FanControl").unwrap().as_str(),
            "/debugstate/kwl/scheduler/FanControl"
        );
        assert_eq!(crash_topic(3).unwrap().as_str(), "/debugstate/kwl/crash/3");
    }
}
