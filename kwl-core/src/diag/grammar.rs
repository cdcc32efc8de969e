#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the diagnostic console.
//!
//! The lexer uses `regal` to produce a bounded token stream, while the parser
//! composes `winnow` combinators over those tokens, walking the static
//! [`catalog`](super::catalog) to build a [`Command`].

use super::catalog::{self, ALL_GROUPS, CommandTag, Node, SubcommandBranch, SubcommandTag};
use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

/// Maximum number of tokens per console line.
pub const MAX_TOKENS: usize = 16;
/// Longest console line accepted by the line editors.
pub const MAX_LINE_LEN: usize = 96;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds recognized by the console grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Keyword or stats group name (case-insensitive match performed later).
    #[regex(r"[A-Za-z_][A-Za-z0-9_-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    /// Underlying lexer reported an unrecoverable error.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "token buffer exhausted after {processed} items")
            }
            LexError::Engine => write!(f, "lexer engine error"),
        }
    }
}

/// Why a tokenized line is not a command. Positions are byte offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarError<'a> {
    /// A word other than the one the command needs.
    Unexpected {
        expected: &'static str,
        found: &'a str,
        at: usize,
    },
    /// The line ended before the command was complete.
    Missing { expected: &'static str },
    /// Characters outside the console alphabet.
    Invalid { lexeme: &'a str, at: usize },
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::Unexpected {
                expected,
                found: "",
                at,
            } => write!(f, "expected {expected}, found end of line at {at}"),
            GrammarError::Unexpected {
                expected,
                found,
                at,
            } => write!(f, "expected {expected}, found `{found}` at {at}"),
            GrammarError::Missing { expected } => write!(f, "missing {expected}"),
            GrammarError::Invalid { lexeme, at } => {
                write!(f, "unsupported input `{lexeme}` at {at}")
            }
        }
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        match token {
            Some(token) if token.kind == TokenKind::Eol => GrammarError::Unexpected {
                expected,
                found: "",
                at: token.span.start,
            },
            Some(token) => GrammarError::Unexpected {
                expected,
                found: token.lexeme,
                at: token.span.start,
            },
            None => GrammarError::Missing { expected },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError::Invalid {
            lexeme: token.lexeme,
            at: token.span.start,
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// Which statistics a scheduler command addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsTarget<'a> {
    All,
    Group(&'a str),
}

impl<'a> StatsTarget<'a> {
    /// Interprets a console argument or bus payload; blank and `all` select every group.
    #[must_use]
    pub fn from_name(name: &'a str) -> Self {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(ALL_GROUPS) {
            StatsTarget::All
        } else {
            StatsTarget::Group(name)
        }
    }
}

/// Commands shared by the console and the bus topics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    SchedulerStats(StatsTarget<'a>),
    SchedulerReset(StatsTarget<'a>),
    CrashList,
    CrashReset,
    CrashProvoke,
    Restart,
    Help(HelpCommand<'a>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Tokenize the provided line.
///
/// # Errors
///
/// Returns [`LexError`] when the line overflows the token buffer.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        push_token(&mut buffer, record.token, lexeme, span)?;
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let span = start..start + partial.fragment.len();
        push_token(&mut buffer, TokenKind::Error, partial.fragment, span)?;
    }

    Ok(buffer)
}

fn push_token<'a>(
    buffer: &mut TokenBuffer<'a>,
    kind: TokenKind,
    lexeme: &'a str,
    span: Range<usize>,
) -> Result<(), LexError> {
    buffer
        .push(Token { kind, lexeme, span })
        .map_err(|_| LexError::TooManyTokens {
            processed: buffer.len() + 1,
        })
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a console command from the provided line.
///
/// # Errors
///
/// Returns [`ParseError`] for unknown keywords, stray tokens or oversized lines.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let (command, mut rest) =
        parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    while let Some((token, remaining)) = rest.split_first() {
        if token.kind == TokenKind::Eol {
            rest = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let command_token = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        if let Some(spec) = catalog::find(command_token.lexeme) {
            let mut state = CommandState::new(spec.tag);
            parse_node(spec.grammar, input, &mut state)?;
            state.finish()
        } else {
            *input = snapshot;
            Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&command_token),
            )))
        }
    }
}

fn parse_node<'src, 'slice>(
    node: &'static Node,
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match node {
        Node::End => Ok(()),
        Node::Subcommands(branches) => parse_subcommands(input, branches, state),
        Node::Target | Node::Topic => {
            state.set_argument(optional_ident(input)?);
            Ok(())
        }
    }
}

fn parse_subcommands<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    branches: &'static [SubcommandBranch],
    state: &mut CommandState<'src>,
) -> Result<(), ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    let expected = branches.first().map_or("subcommand", |branch| branch.name);
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            let branch = branches
                .iter()
                .find(|candidate| candidate.name.eq_ignore_ascii_case(token.lexeme))
                .ok_or_else(|| ErrMode::Backtrack(GrammarError::unexpected(expected, Some(token))))?;
            *input = rest;
            state.set_subcommand(branch.tag);
            parse_node(branch.grammar, input, state)
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            expected,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(expected, None))),
    }
}

fn optional_ident<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
) -> Result<Option<&'src str>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            *input = rest;
            Ok(Some(token.lexeme))
        }
        Some((token, _)) if token.kind == TokenKind::Eol => Ok(None),
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            "identifier",
            Some(token),
        ))),
        None => Ok(None),
    }
}

enum CommandState<'a> {
    Scheduler {
        subcommand: Option<SubcommandTag>,
        target: Option<&'a str>,
    },
    Crash {
        subcommand: Option<SubcommandTag>,
    },
    Restart,
    Help {
        topic: Option<&'a str>,
    },
}

impl<'a> CommandState<'a> {
    fn new(tag: CommandTag) -> Self {
        match tag {
            CommandTag::Scheduler => CommandState::Scheduler {
                subcommand: None,
                target: None,
            },
            CommandTag::Crash => CommandState::Crash { subcommand: None },
            CommandTag::Restart => CommandState::Restart,
            CommandTag::Help => CommandState::Help { topic: None },
        }
    }

    fn set_subcommand(&mut self, tag: SubcommandTag) {
        match self {
            CommandState::Scheduler { subcommand, .. } | CommandState::Crash { subcommand } => {
                *subcommand = Some(tag);
            }
            CommandState::Restart | CommandState::Help { .. } => {}
        }
    }

    fn set_argument(&mut self, value: Option<&'a str>) {
        match self {
            CommandState::Scheduler { target, .. } => *target = value,
            CommandState::Help { topic } => *topic = value,
            CommandState::Crash { .. } | CommandState::Restart => {}
        }
    }

    fn finish(self) -> Result<Command<'a>, ErrMode<GrammarError<'a>>> {
        let target = |name: Option<&'a str>| name.map_or(StatsTarget::All, StatsTarget::from_name);
        match self {
            CommandState::Scheduler {
                subcommand: Some(SubcommandTag::SchedulerStats),
                target: name,
            } => Ok(Command::SchedulerStats(target(name))),
            CommandState::Scheduler {
                subcommand: Some(SubcommandTag::SchedulerReset),
                target: name,
            } => Ok(Command::SchedulerReset(target(name))),
            CommandState::Crash {
                subcommand: Some(SubcommandTag::CrashList),
            } => Ok(Command::CrashList),
            CommandState::Crash {
                subcommand: Some(SubcommandTag::CrashReset),
            } => Ok(Command::CrashReset),
            CommandState::Crash {
                subcommand: Some(SubcommandTag::CrashProvoke),
            } => Ok(Command::CrashProvoke),
            CommandState::Restart => Ok(Command::Restart),
            CommandState::Help { topic } => Ok(Command::Help(HelpCommand { topic })),
            CommandState::Scheduler { .. } => Err(ErrMode::Backtrack(GrammarError::unexpected(
                "scheduler subcommand",
                None,
            ))),
            CommandState::Crash { .. } => Err(ErrMode::Backtrack(GrammarError::unexpected(
                "crash subcommand",
                None,
            ))),
        }
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(input: &str) -> Command<'_> {
        parse(input).expect("command should parse")
    }

    #[test]
    fn parses_scheduler_stats_with_and_without_group() {
        assert_eq!(
            parse_ok("scheduler stats"),
            Command::SchedulerStats(StatsTarget::All)
        );
        assert_eq!(
            parse_ok("scheduler stats FanControl\r\n"),
            Command::SchedulerStats(StatsTarget::Group("FanControl"))
        );
    }

    #[test]
    fn reset_defaults_to_all_groups() {
        assert_eq!(
            parse_ok("scheduler reset"),
            Command::SchedulerReset(StatsTarget::All)
        );
        assert_eq!(
            parse_ok("scheduler reset ALL"),
            Command::SchedulerReset(StatsTarget::All)
        );
        assert_eq!(
            parse_ok("scheduler reset TempSensors"),
            Command::SchedulerReset(StatsTarget::Group("TempSensors"))
        );
    }

    #[test]
    fn parses_crash_and_restart_commands() {
        assert_eq!(parse_ok("crash list"), Command::CrashList);
        assert_eq!(parse_ok("crash reset"), Command::CrashReset);
        assert_eq!(parse_ok("Crash Provoke"), Command::CrashProvoke);
        assert_eq!(parse_ok("restart"), Command::Restart);
    }

    #[test]
    fn parses_help_topic() {
        assert_eq!(
            parse_ok("help crash"),
            Command::Help(HelpCommand {
                topic: Some("crash"),
            })
        );
        assert_eq!(parse_ok("help"), Command::Help(HelpCommand { topic: None }));
    }

    #[test]
    fn rejects_missing_subcommand_and_trailing_tokens() {
        assert!(matches!(
            parse("crash"),
            Err(ParseError::Grammar(GrammarError::Missing { .. }))
        ));
        assert!(matches!(
            parse("restart now"),
            Err(ParseError::Grammar(GrammarError::Unexpected { found: "now", .. }))
        ));
        assert!(matches!(parse("scheduler stats a b"), Err(ParseError::Grammar(_))));
    }

    #[test]
    fn rejects_invalid_token() {
        match parse("crash list$") {
            Err(ParseError::Grammar(err)) => {
                assert_eq!(
                    err,
                    GrammarError::Invalid {
                        lexeme: "$",
                        at: 10
                    }
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
