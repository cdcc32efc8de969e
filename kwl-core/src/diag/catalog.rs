//! Static catalog of diagnostic console commands.
//!
//! The parser walks these nodes and the help output renders them, so keywords
//! and usage text cannot drift apart.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    Scheduler,
    Crash,
    Restart,
    Help,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubcommandTag {
    SchedulerStats,
    SchedulerReset,
    CrashList,
    CrashReset,
    CrashProvoke,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub tag: CommandTag,
    pub grammar: &'static Node,
    pub usage: &'static str,
    pub summary: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    End,
    Subcommands(&'static [SubcommandBranch]),
    /// Optional stats group name; the keyword `all` or nothing selects every group.
    Target,
    /// Optional free-form help topic.
    Topic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubcommandBranch {
    pub name: &'static str,
    pub tag: SubcommandTag,
    pub grammar: &'static Node,
}

/// Keyword selecting every stats group.
pub const ALL_GROUPS: &str = "all";

const END: Node = Node::End;
const TARGET: Node = Node::Target;
const TOPIC: Node = Node::Topic;

const SCHEDULER_SUBCOMMANDS: [SubcommandBranch; 2] = [
    SubcommandBranch {
        name: "stats",
        tag: SubcommandTag::SchedulerStats,
        grammar: &TARGET,
    },
    SubcommandBranch {
        name: "reset",
        tag: SubcommandTag::SchedulerReset,
        grammar: &TARGET,
    },
];

const CRASH_SUBCOMMANDS: [SubcommandBranch; 3] = [
    SubcommandBranch {
        name: "list",
        tag: SubcommandTag::CrashList,
        grammar: &END,
    },
    SubcommandBranch {
        name: "reset",
        tag: SubcommandTag::CrashReset,
        grammar: &END,
    },
    SubcommandBranch {
        name: "provoke",
        tag: SubcommandTag::CrashProvoke,
        grammar: &END,
    },
];

const SCHEDULER_GRAMMAR: Node = Node::Subcommands(&SCHEDULER_SUBCOMMANDS);
const CRASH_GRAMMAR: Node = Node::Subcommands(&CRASH_SUBCOMMANDS);

const COMMANDS: [CommandSpec; 4] = [
    CommandSpec {
        name: "scheduler",
        tag: CommandTag::Scheduler,
        grammar: &SCHEDULER_GRAMMAR,
        usage: "scheduler stats [GROUP] | scheduler reset [GROUP|all]",
        summary: "task run-time statistics",
    },
    CommandSpec {
        name: "crash",
        tag: CommandTag::Crash,
        grammar: &CRASH_GRAMMAR,
        usage: "crash list | crash reset | crash provoke",
        summary: "watchdog crash records",
    },
    CommandSpec {
        name: "restart",
        tag: CommandTag::Restart,
        grammar: &END,
        usage: "restart",
        summary: "restart the controller",
    },
    CommandSpec {
        name: "help",
        tag: CommandTag::Help,
        grammar: &TOPIC,
        usage: "help [COMMAND]",
        summary: "show command usage",
    },
];

/// Returns the full command catalog.
#[must_use]
pub const fn commands() -> &'static [CommandSpec] {
    &COMMANDS
}

/// Looks up a command by its tag.
#[must_use]
pub fn command(tag: CommandTag) -> &'static CommandSpec {
    match tag {
        CommandTag::Scheduler => &COMMANDS[0],
        CommandTag::Crash => &COMMANDS[1],
        CommandTag::Restart => &COMMANDS[2],
        CommandTag::Help => &COMMANDS[3],
    }
}

/// Finds a command by name (case insensitive).
#[must_use]
pub fn find(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_resolve_to_their_entries() {
        for spec in commands() {
            assert_eq!(command(spec.tag).name, spec.name);
            assert_eq!(find(spec.name).map(|c| c.tag), Some(spec.tag));
        }
        assert_eq!(find("CRASH").map(|c| c.tag), Some(CommandTag::Crash));
        assert!(find("reboot").is_none());
    }
}
