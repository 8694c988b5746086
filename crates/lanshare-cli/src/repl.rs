//! Interactive session input.

use std::path::PathBuf;

/// Help text shown for `/help` and unknown commands
pub const HELP: &str = "\
Commands:
  /send <path>       send a file to the peer
  /cancel            cancel the file you are sending
  /cancel-receive    cancel the file you are receiving
  /quit              close the connection
Any other line is sent as chat.";

/// One line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Chat text
    Chat(String),
    /// Send a file
    Send(PathBuf),
    /// Cancel the outbound transfer
    CancelSend,
    /// Cancel the inbound transfer
    CancelReceive,
    /// Close the session
    Quit,
    /// Show help
    Help,
    /// Blank line
    Empty,
    /// Command with missing or unknown arguments
    Invalid(String),
}

impl Input {
    /// Parse one input line
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Self::Empty;
        }

        // `//text` sends chat starting with a slash
        if let Some(rest) = line.strip_prefix("//") {
            return Self::Chat(format!("/{rest}"));
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Chat(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };

        match (name, arg.is_empty()) {
            ("send", false) => Self::Send(PathBuf::from(arg)),
            ("send", true) => Self::Invalid("usage: /send <path>".to_string()),
            ("cancel", true) => Self::CancelSend,
            ("cancel-receive", true) => Self::CancelReceive,
            ("quit" | "exit", true) => Self::Quit,
            ("help" | "?", _) => Self::Help,
            _ => Self::Invalid(format!("unknown command: /{command}")),
        }
    }
}
