use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use crate::device::Host;

pub const EMULATOR_HELP: &[(&str, &str)] = &[
    ("run", "run <ms>                     - advance virtual time"),
    (
        "topic",
        "topic <topic> [payload]      - deliver a bus message to the device",
    ),
    ("exit", "exit                         - end the session"),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Console,
    Stats,
    Crash,
    Restart,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Console => "logs/emulator/console.log",
            TranscriptProfile::Stats => "logs/emulator/stats.log",
            TranscriptProfile::Crash => "logs/emulator/crash.log",
            TranscriptProfile::Restart => "logs/emulator/restart.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Console => "KWL controller emulator console transcript",
            TranscriptProfile::Stats => "KWL controller emulator scheduler stats transcript",
            TranscriptProfile::Crash => "KWL controller emulator watchdog crash transcript",
            TranscriptProfile::Restart => "KWL controller emulator restart transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("console") {
            Ok(Self::Console)
        } else if tag.eq_ignore_ascii_case("stats") {
            Ok(Self::Stats)
        } else if tag.eq_ignore_ascii_case("crash") {
            Ok(Self::Crash)
        } else if tag.eq_ignore_ascii_case("restart") {
            Ok(Self::Restart)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

enum LineSource {
    Stdin(io::StdinLock<'static>),
    Script(VecDeque<String>),
}

/// Console session: feeds lines to the device and records the exchange.
pub struct Session {
    source: LineSource,
    transcript: TranscriptLogger,
    started_at: HostInstant,
    echo: bool,
    command_count: usize,
}

impl Session {
    /// Reads commands from stdin and prints device output to stdout.
    pub fn interactive(profile: TranscriptProfile) -> io::Result<Self> {
        Ok(Self {
            source: LineSource::Stdin(io::stdin().lock()),
            transcript: TranscriptLogger::new(profile)?,
            started_at: HostInstant::now(),
            echo: true,
            command_count: 0,
        })
    }

    /// Replays `lines`; output only goes to the transcript.
    pub fn scripted<I, S>(profile: TranscriptProfile, lines: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            source: LineSource::Script(lines.into_iter().map(Into::into).collect()),
            transcript: TranscriptLogger::new(profile)?,
            started_at: HostInstant::now(),
            echo: false,
            command_count: 0,
        })
    }

    pub fn command_count(&self) -> usize {
        self.command_count
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        match &mut self.source {
            LineSource::Stdin(reader) => {
                let mut stdout = io::stdout().lock();
                write!(stdout, "> ")?;
                stdout.flush()?;

                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 {
                    writeln!(stdout)?;
                    return Ok(None);
                }
                Ok(Some(line))
            }
            LineSource::Script(lines) => Ok(lines.pop_front()),
        }
    }

    fn print(&self, line: &str) -> io::Result<()> {
        if self.echo {
            writeln!(io::stdout().lock(), "{line}")?;
        }
        Ok(())
    }
}

impl Host for Session {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let elapsed = self.started_at.elapsed();
            self.transcript
                .append_line(elapsed, TranscriptRole::Host, trimmed)?;
            if should_terminate(trimmed) {
                self.print("Session closed.")?;
                return Ok(None);
            }
            if trimmed.eq_ignore_ascii_case("help") {
                for (_, usage) in EMULATOR_HELP {
                    self.print(usage)?;
                    self.transcript
                        .append_line(elapsed, TranscriptRole::Emulator, usage)?;
                }
            }

            self.command_count += 1;
            return Ok(Some(trimmed.to_owned()));
        }
    }

    fn device_output(&mut self, line: &str) -> io::Result<()> {
        self.print(line)?;
        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Emulator, line)
    }
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are host milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
