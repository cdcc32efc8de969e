//! Diagnostic command dispatcher.
//!
//! Console lines and bus topics both end up here as a [`Command`]. The
//! executor works against a [`DiagnosticBackend`] so the firmware, the emulator
//! and the tests can share it.

use core::fmt;

use heapless::Vec;

use crate::crash::{
    BusyWait, CRASH_LOG_CAPACITY, CrashLog, CrashProvoker, CrashRecord, CrashRecorder,
    CrashStorage, StorageError,
};
use crate::scheduler::{Scheduler, StatsSnapshot, TaskTimingStats};

use super::catalog::{self, CommandSpec};
use super::grammar::{self, Command, HelpCommand, StatsTarget};
use super::topic::{self, TopicError};

/// Most stats groups reported by a single query.
pub const MAX_STATS_GROUPS: usize = 16;

/// State the diagnostic commands read and modify.
pub trait DiagnosticBackend {
    type StorageError;

    /// Visits every named stats group in registration order.
    fn for_each_stats(&self, visit: &mut dyn FnMut(&TaskTimingStats<'_>));

    fn crash_log(&self) -> &CrashLog;

    /// Clears and persists the crash ring.
    ///
    /// # Errors
    ///
    /// Returns the storage failure; the in-memory ring is cleared regardless.
    fn clear_crashes(&mut self) -> Result<(), StorageError<Self::StorageError>>;

    /// Arms the hang task.
    fn provoke_crash(&mut self);
}

/// Backend over the scheduler, the crash recorder and the crash provoker.
pub struct SystemDiagnostics<'r, 'a, S, B> {
    scheduler: &'r Scheduler<'a>,
    recorder: &'r mut CrashRecorder<S>,
    provoker: &'r CrashProvoker<'a, B>,
}

impl<'r, 'a, S, B> SystemDiagnostics<'r, 'a, S, B> {
    #[must_use]
    pub fn new(
        scheduler: &'r Scheduler<'a>,
        recorder: &'r mut CrashRecorder<S>,
        provoker: &'r CrashProvoker<'a, B>,
    ) -> Self {
        Self {
            scheduler,
            recorder,
            provoker,
        }
    }
}

impl<S, B> DiagnosticBackend for SystemDiagnostics<'_, '_, S, B>
where
    S: CrashStorage,
    B: BusyWait,
{
    type StorageError = S::Error;

    fn for_each_stats(&self, visit: &mut dyn FnMut(&TaskTimingStats<'_>)) {
        for stats in self.scheduler.stats() {
            visit(stats);
        }
    }

    fn crash_log(&self) -> &CrashLog {
        self.recorder.records()
    }

    fn clear_crashes(&mut self) -> Result<(), StorageError<S::Error>> {
        self.recorder.reset_all()
    }

    fn provoke_crash(&mut self) {
        self.provoker.provoke();
    }
}

/// Successful command results, copied out so they outlive the borrow of the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// `omitted` counts matching groups past [`MAX_STATS_GROUPS`].
    Stats {
        groups: Vec<StatsSnapshot, MAX_STATS_GROUPS>,
        omitted: usize,
    },
    StatsReset { groups: usize },
    Crashes(Vec<CrashRecord, CRASH_LOG_CAPACITY>),
    CrashesCleared,
    CrashProvoked,
    /// The caller restarts the device once the response is out.
    RestartRequested,
    Help(Option<&'static CommandSpec>),
}

/// Errors surfaced while executing a command.
#[derive(Debug, PartialEq)]
pub enum CommandError<'a, E> {
    Parse(grammar::ParseError<'a>),
    Topic(TopicError),
    /// No stats group carries this name. Nothing was changed.
    UnknownGroup(&'a str),
    UnknownHelpTopic(&'a str),
    Storage(StorageError<E>),
}

impl<'a, E> CommandError<'a, E> {
    /// Returns `true` for rejections that are answered with a NAK.
    #[must_use]
    pub const fn is_nak(&self) -> bool {
        matches!(
            self,
            CommandError::Topic(_) | CommandError::UnknownGroup(_) | CommandError::UnknownHelpTopic(_)
        )
    }
}

impl<'a, E> From<grammar::ParseError<'a>> for CommandError<'a, E> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl<E> From<TopicError> for CommandError<'_, E> {
    fn from(error: TopicError) -> Self {
        Self::Topic(error)
    }
}

impl<E> From<StorageError<E>> for CommandError<'_, E> {
    fn from(error: StorageError<E>) -> Self {
        Self::Storage(error)
    }
}

impl<E: fmt::Debug> fmt::Display for CommandError<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(err) => write!(f, "parse error: {err}"),
            CommandError::Topic(err) => write!(f, "topic error: {err}"),
            CommandError::UnknownGroup(name) => write!(f, "unknown stats group `{name}`"),
            CommandError::UnknownHelpTopic(name) => write!(f, "no help for `{name}`"),
            CommandError::Storage(err) => err.fmt(f),
        }
    }
}

pub type CommandResult<'a, E> = Result<CommandOutcome, CommandError<'a, E>>;

/// Dispatches diagnostic commands into a backend.
pub struct CommandExecutor<B> {
    backend: B,
}

impl<B> CommandExecutor<B> {
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[must_use]
    pub fn into_inner(self) -> B {
        self.backend
    }
}

impl<B> CommandExecutor<B>
where
    B: DiagnosticBackend,
{
    /// Parses and executes a console line.
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    pub fn execute<'a>(&mut self, line: &'a str) -> CommandResult<'a, B::StorageError> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    /// Executes a bus message; `None` when the topic is not a diagnostic one.
    pub fn execute_topic<'a>(
        &mut self,
        topic: &str,
        payload: &'a str,
    ) -> Option<CommandResult<'a, B::StorageError>> {
        let command = topic::parse_topic(topic, payload)?;
        Some(command.map_err(CommandError::from).and_then(|command| self.dispatch(command)))
    }

    /// Executes an already parsed command.
    ///
    /// # Errors
    ///
    /// See [`CommandError`].
    pub fn dispatch<'a>(&mut self, command: Command<'a>) -> CommandResult<'a, B::StorageError> {
        match command {
            Command::SchedulerStats(target) => self.stats(target),
            Command::SchedulerReset(target) => self
                .reset_stats(target)
                .map(|groups| CommandOutcome::StatsReset { groups }),
            Command::CrashList => Ok(CommandOutcome::Crashes(
                self.backend.crash_log().iter().copied().collect(),
            )),
            Command::CrashReset => {
                self.backend.clear_crashes()?;
                Ok(CommandOutcome::CrashesCleared)
            }
            Command::CrashProvoke => {
                self.backend.provoke_crash();
                Ok(CommandOutcome::CrashProvoked)
            }
            Command::Restart => Ok(CommandOutcome::RestartRequested),
            Command::Help(HelpCommand { topic: None }) => Ok(CommandOutcome::Help(None)),
            Command::Help(HelpCommand { topic: Some(name) }) => catalog::find(name)
                .map(|spec| CommandOutcome::Help(Some(spec)))
                .ok_or(CommandError::UnknownHelpTopic(name)),
        }
    }

    fn stats<'a>(
        &self,
        target: StatsTarget<'a>,
    ) -> Result<CommandOutcome, CommandError<'a, B::StorageError>> {
        let mut groups = Vec::new();
        let mut omitted = 0;
        self.backend.for_each_stats(&mut |stats| {
            if target_matches(target, stats) && groups.push(stats.snapshot()).is_err() {
                omitted += 1;
            }
        });

        match target {
            StatsTarget::Group(name) if groups.is_empty() => Err(CommandError::UnknownGroup(name)),
            _ => Ok(CommandOutcome::Stats { groups, omitted }),
        }
    }

    fn reset_stats<'a>(
        &self,
        target: StatsTarget<'a>,
    ) -> Result<usize, CommandError<'a, B::StorageError>> {
        if let StatsTarget::Group(name) = target {
            let mut known = false;
            self.backend
                .for_each_stats(&mut |stats| known |= target_matches(target, stats));
            if !known {
                return Err(CommandError::UnknownGroup(name));
            }
        }

        let mut groups = 0;
        self.backend.for_each_stats(&mut |stats| {
            if target_matches(target, stats) {
                stats.reset();
                groups += 1;
            }
        });
        Ok(groups)
    }
}

fn target_matches(target: StatsTarget<'_>, stats: &TaskTimingStats<'_>) -> bool {
    match target {
        StatsTarget::All => true,
        StatsTarget::Group(name) => stats.name().eq_ignore_ascii_case(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::MemoryStorageError;

    struct MockBackend {
        stats: Vec<TaskTimingStats<'static>, 24>,
        log: CrashLog,
        provoked: bool,
        fail_clear: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            let mut stats = Vec::new();
            let _ = stats.push(TaskTimingStats::new("FanControl"));
            let _ = stats.push(TaskTimingStats::new("TempSensors"));
            Self {
                stats,
                log: CrashLog::new(),
                provoked: false,
                fail_clear: false,
            }
        }
    }

    impl DiagnosticBackend for MockBackend {
        type StorageError = MemoryStorageError;

        fn for_each_stats(&self, visit: &mut dyn FnMut(&TaskTimingStats<'_>)) {
            self.stats.iter().for_each(visit);
        }

        fn crash_log(&self) -> &CrashLog {
            &self.log
        }

        fn clear_crashes(&mut self) -> Result<(), StorageError<MemoryStorageError>> {
            self.log.clear();
            if self.fail_clear {
                Err(StorageError::Write(MemoryStorageError::WriteRejected))
            } else {
                Ok(())
            }
        }

        fn provoke_crash(&mut self) {
            self.provoked = true;
        }
    }

    #[test]
    fn stats_query_reports_groups_past_capacity() {
        let mut backend = MockBackend::new();
        while backend.stats.len() < MAX_STATS_GROUPS + 3 {
            let _ = backend.stats.push(TaskTimingStats::new("Display"));
        }
        let mut executor = CommandExecutor::new(backend);

        match executor.execute("scheduler stats all") {
            Ok(CommandOutcome::Stats { groups, omitted }) => {
                assert_eq!(groups.len(), MAX_STATS_GROUPS);
                assert_eq!(omitted, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn stats_query_filters_by_group() {
        let backend = MockBackend::new();
        backend.stats[0].record(1_500);
        let mut executor = CommandExecutor::new(backend);

        match executor.execute("scheduler stats fancontrol") {
            Ok(CommandOutcome::Stats { groups, omitted }) => {
                assert_eq!(groups.len(), 1);
                assert_eq!(groups[0].name, "FanControl");
                assert_eq!(groups[0].last, 1_500);
                assert_eq!(omitted, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        match executor.execute("scheduler stats") {
            Ok(CommandOutcome::Stats { groups, .. }) => assert_eq!(groups.len(), 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn unknown_group_is_rejected_without_side_effects() {
        let backend = MockBackend::new();
        backend.stats[0].record(10);
        backend.stats[1].record(20);
        let mut executor = CommandExecutor::new(backend);

        let err = executor.execute("scheduler reset Display").unwrap_err();
        assert_eq!(err, CommandError::UnknownGroup("Display"));
        assert!(err.is_nak());
        assert_eq!(executor.backend().stats[0].count(), 1);
        assert_eq!(executor.backend().stats[1].count(), 1);
    }

    #[test]
    fn reset_clears_one_or_all_groups() {
        let backend = MockBackend::new();
        backend.stats[0].record(10);
        backend.stats[1].record(20);
        let mut executor = CommandExecutor::new(backend);

        assert_eq!(
            executor.execute("scheduler reset TempSensors"),
            Ok(CommandOutcome::StatsReset { groups: 1 })
        );
        assert_eq!(executor.backend().stats[0].count(), 1);
        assert_eq!(executor.backend().stats[1].count(), 0);

        assert_eq!(
            executor.execute("scheduler reset"),
            Ok(CommandOutcome::StatsReset { groups: 2 })
        );
        assert_eq!(executor.backend().stats[0].count(), 0);
    }

    #[test]
    fn crash_commands_reach_the_backend() {
        let mut backend = MockBackend::new();
        backend.log.push(CrashRecord::new(1_000, 0, 0x123, 0x20));
        let mut executor = CommandExecutor::new(backend);

        match executor.execute("crash list") {
            Ok(CommandOutcome::Crashes(records)) => assert_eq!(records.len(), 1),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            executor.execute("crash provoke"),
            Ok(CommandOutcome::CrashProvoked)
        );
        assert!(executor.backend().provoked);
        assert_eq!(executor.execute("crash reset"), Ok(CommandOutcome::CrashesCleared));
        assert!(executor.backend().log.is_empty());

        executor.backend_mut().fail_clear = true;
        assert!(matches!(
            executor.execute("crash reset"),
            Err(CommandError::Storage(StorageError::Write(_)))
        ));
    }

    #[test]
    fn topics_share_the_command_model() {
        let mut executor = CommandExecutor::new(MockBackend::new());
        assert_eq!(
            executor.execute_topic("/set/kwl/restart", ""),
            Some(Ok(CommandOutcome::RestartRequested))
        );
        assert_eq!(
            executor.execute_topic("/debugset/kwl/scheduler/resetvalues", "nope"),
            Some(Err(CommandError::UnknownGroup("nope")))
        );
        assert_eq!(executor.execute_topic("/set/kwl/unrelated", ""), None);
    }

    #[test]
    fn help_resolves_catalog_entries() {
        let mut executor = CommandExecutor::new(MockBackend::new());
        match executor.execute("help crash") {
            Ok(CommandOutcome::Help(Some(spec))) => assert_eq!(spec.name, "crash"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            executor.execute("help nothing"),
            Err(CommandError::UnknownHelpTopic("nothing"))
        );
    }
}
