//! Interactive command console
//!
//! Reads at most one key per 100 ms from the raw-mode TTY and maps it to
//! runtime actions: quit, verbosity stepping, help, and filter commands
//! typed on a prompt.

use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::model::PipelineGraph;
use crate::ports::FilterBackend;
use crate::term;
use crate::utils::logging::LogHandle;

/// What the supervisor should do after a console poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    Continue,
    Exit,
}

/// A parsed `<target> <time> <command> [<argument>]` line.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCommand {
    pub target: String,
    pub time: f64,
    pub command: String,
    pub arg: String,
}

pub struct Console {
    last_poll: Option<i64>,
    log: Option<LogHandle>,
}

impl Console {
    pub fn new(log: Option<LogHandle>) -> Self {
        Self {
            last_poll: None,
            log,
        }
    }

    /// Poll the keyboard once. `cur_time` is the supervisor's monotonic
    /// microsecond clock.
    pub fn poll(
        &mut self,
        cur_time: i64,
        filters: &mut dyn FilterBackend,
        graph: &PipelineGraph,
    ) -> ConsoleAction {
        if term::received_signal_count() > 0 {
            return ConsoleAction::Exit;
        }

        let key = match self.last_poll {
            Some(last) if cur_time - last < 100_000 => -1,
            _ => {
                self.last_poll = Some(cur_time);
                term::read_key()
            }
        };

        match u8::try_from(key).map(char::from) {
            Ok('q') => {
                info!("[q] command received. Exiting.");
                return ConsoleAction::Exit;
            }
            Ok('+') => {
                if let Some(log) = &mut self.log {
                    log.raise();
                }
            }
            Ok('-') => {
                if let Some(log) = &mut self.log {
                    log.lower();
                }
            }
            Ok('?') => print_help(),
            Ok(c @ ('c' | 'C')) => self.filter_command(c == 'C', filters, graph),
            _ => {}
        }

        ConsoleAction::Continue
    }

    /// Prompt for a filter command and dispatch it to every live graph.
    /// `c` sends one-shot to the first matching filter; `C` broadcasts,
    /// and is the only variant allowed to queue for a future time.
    fn filter_command(
        &mut self,
        broadcast: bool,
        filters: &mut dyn FilterBackend,
        graph: &PipelineGraph,
    ) {
        eprintln!();
        eprintln!("Enter command: <target>|all <time>|-1 <command>[ <argument>]");
        term::set_tty_echo(true);
        let line = read_command_line();
        term::set_tty_echo(false);
        eprintln!();

        let cmd = match parse_command_line(&line) {
            Ok(cmd) => cmd,
            Err(given) => {
                error!(
                    "Parse error, at least 3 arguments were expected, only {} given in string '{}'",
                    given, line
                );
                return;
            }
        };
        debug!(
            "Processing command target:{} time:{} command:{} arg:{}",
            cmd.target, cmd.time, cmd.command, cmd.arg
        );

        for fg in &graph.filtergraphs {
            if !fg.ready {
                continue;
            }
            if cmd.time < 0.0 {
                match filters.send_command(
                    fg.index,
                    &cmd.target,
                    &cmd.command,
                    &cmd.arg,
                    !broadcast,
                ) {
                    Ok(reply) => {
                        eprintln!("Command reply for graph {}:\n{}", fg.index, reply)
                    }
                    Err(e) => eprintln!("Command failed for graph {}: {}", fg.index, e),
                }
            } else if !broadcast {
                eprintln!(
                    "Queuing commands only on filters supporting the specific command is unsupported"
                );
            } else if let Err(e) =
                filters.queue_command(fg.index, &cmd.target, &cmd.command, &cmd.arg, cmd.time)
            {
                eprintln!("Queuing command failed with error {}", e);
            }
        }
    }
}

/// Read one line from the raw-mode TTY, byte by byte.
fn read_command_line() -> String {
    let mut buf = Vec::new();
    loop {
        let k = term::read_key();
        match k {
            k if k == i32::from(b'\n') || k == i32::from(b'\r') => break,
            0 => break, // EOF
            k if k > 0 => {
                if buf.len() >= 4095 {
                    break;
                }
                buf.push(k as u8);
            }
            _ => thread::sleep(Duration::from_millis(10)),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parse `<target> <time> <command> [<argument>]`. On failure the error
/// carries how many fields were recognized.
pub fn parse_command_line(line: &str) -> Result<FilterCommand, usize> {
    fn next_token<'a>(rest: &mut &'a str) -> Option<&'a str> {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.find(char::is_whitespace) {
            Some(end) => {
                *rest = &trimmed[end..];
                Some(&trimmed[..end])
            }
            None => {
                *rest = "";
                Some(trimmed)
            }
        }
    }

    let mut rest = line.trim();

    let Some(target) = next_token(&mut rest) else {
        return Err(0);
    };
    let Some(time_str) = next_token(&mut rest) else {
        return Err(1);
    };
    let Ok(time) = time_str.parse::<f64>() else {
        return Err(1);
    };
    let Some(command) = next_token(&mut rest) else {
        return Err(2);
    };
    let arg = rest.trim().to_string();

    Ok(FilterCommand {
        target: target.to_string(),
        time,
        command: command.to_string(),
        arg,
    })
}

fn print_help() {
    eprint!(
        "key    function\n\
         ?      show this help\n\
         +      increase verbosity\n\
         -      decrease verbosity\n\
         c      Send command to first matching filter supporting it\n\
         C      Send/Queue command to all matching filters\n\
         q      quit\n"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_command_with_argument() {
        let cmd = parse_command_line("all -1 volume 0.5 extra").unwrap();
        assert_eq!(cmd.target, "all");
        assert_eq!(cmd.time, -1.0);
        assert_eq!(cmd.command, "volume");
        assert_eq!(cmd.arg, "0.5 extra");
    }

    #[test]
    fn parses_without_argument() {
        let cmd = parse_command_line("overlay 12.5 enable").unwrap();
        assert_eq!(cmd.target, "overlay");
        assert_eq!(cmd.time, 12.5);
        assert_eq!(cmd.command, "enable");
        assert_eq!(cmd.arg, "");
    }

    #[test]
    fn rejects_short_or_malformed_lines() {
        assert_eq!(parse_command_line(""), Err(0));
        assert_eq!(parse_command_line("all"), Err(1));
        assert_eq!(parse_command_line("all notatime cmd"), Err(1));
        assert_eq!(parse_command_line("all -1"), Err(2));
    }
}
