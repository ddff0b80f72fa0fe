//! Interactive console

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;

/// A line typed at the console, parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    ListPorts,
    Select(String),
    Stop,
    Status,
    Help,
    Quit,
}

/// Parse one console line. Empty lines yield None; unknown input is an error
/// message meant for the user.
pub fn parse_command(line: &str) -> Option<std::result::Result<ConsoleCommand, String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_lowercase().as_str() {
        "ports" | "list" => Ok(ConsoleCommand::ListPorts),
        "select" | "use" if rest.is_empty() => Err(format!("usage: {} <port name>", verb)),
        "select" | "use" => Ok(ConsoleCommand::Select(rest.to_string())),
        "stop" => Ok(ConsoleCommand::Stop),
        "status" => Ok(ConsoleCommand::Status),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(format!("unknown command '{}', type 'help'", other)),
    };
    Some(command)
}

pub const HELP: &str = "\
Commands:
  ports | list          list MIDI output ports
  select | use <name>   switch output to the port matching <name>
  stop                  stop sending, leave the device idle
  status                show the active port
  quit | exit           shut down";

/// Read commands until quit, forwarding them to the main loop.
///
/// Blocks; run it on its own thread. Ctrl-C and EOF at the prompt count as
/// quit.
pub fn run_console(commands: mpsc::Sender<ConsoleCommand>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    loop {
        let command = match rl.readline("shuttle> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match parse_command(&line) {
                    Some(Ok(command)) => command,
                    Some(Err(message)) => {
                        println!("{}", message);
                        continue;
                    },
                    None => continue,
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => ConsoleCommand::Quit,
            Err(e) => return Err(e.into()),
        };

        if command == ConsoleCommand::Help {
            println!("{}", HELP);
            continue;
        }

        let quit = command == ConsoleCommand::Quit;
        if commands.blocking_send(command).is_err() || quit {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(line: &str) -> ConsoleCommand {
        parse_command(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(parsed("ports"), ConsoleCommand::ListPorts);
        assert_eq!(parsed("LIST"), ConsoleCommand::ListPorts);
        assert_eq!(parsed("stop"), ConsoleCommand::Stop);
        assert_eq!(parsed("  status  "), ConsoleCommand::Status);
        assert_eq!(parsed("exit"), ConsoleCommand::Quit);
        assert_eq!(parsed("quit"), ConsoleCommand::Quit);
        assert_eq!(parsed("?"), ConsoleCommand::Help);
    }

    #[test]
    fn test_select_keeps_full_port_name() {
        assert_eq!(
            parsed("select loopMIDI Port 2"),
            ConsoleCommand::Select("loopMIDI Port 2".to_string())
        );
        assert_eq!(
            parsed("use   SDR Console "),
            ConsoleCommand::Select("SDR Console".to_string())
        );
    }

    #[test]
    fn test_select_without_name_is_rejected() {
        assert!(parse_command("select").unwrap().is_err());
        assert!(parse_command("use   ").unwrap().is_err());
    }

    #[test]
    fn test_blank_and_unknown_lines() {
        assert!(parse_command("   ").is_none());
        assert!(parse_command("jog").unwrap().is_err());
    }
}
