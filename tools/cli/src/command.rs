//! Shell command table.

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Usage lines shown by `help`.
pub const HELP: &str = "\
Commands:
  signup <user>               Create an account and log in
  login <user>                Log in
  logout                      Close every open file and log out
  add <path> [name]           Encrypt a local file into the vault
  open <file>                 Decrypt a vault file for editing
  close <file>                Re-encrypt an open file
  push <file>                 Upload a closed file
  share <file> <user>         Share one of your files
  unshare <file> <user>       Revoke a share
  list                        Show tracked files
  poll                        Accept pending shares now
  help                        Show this text
  exit                        Close every open file and quit

Files are named <owner>/<filename>; a bare <filename> means one of yours.";

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Signup(String),
    Login(String),
    Logout,
    Add { source: PathBuf, name: Option<String> },
    Open(String),
    Close(String),
    Push(String),
    Share { file: String, recipient: String },
    Unshare { file: String, recipient: String },
    List,
    Poll,
    Help,
    Exit,
}

impl Command {
    /// Parse a shell line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Ok(None);
        };

        let command = match (name, args) {
            ("signup", [user]) => Self::Signup(user.to_string()),
            ("login", [user]) => Self::Login(user.to_string()),
            ("logout", []) => Self::Logout,
            ("add", [source]) => Self::Add {
                source: PathBuf::from(source),
                name: None,
            },
            ("add", [source, name]) => Self::Add {
                source: PathBuf::from(source),
                name: Some(name.to_string()),
            },
            ("open", [file]) => Self::Open(file.to_string()),
            ("close", [file]) => Self::Close(file.to_string()),
            ("push", [file]) => Self::Push(file.to_string()),
            ("share", [file, recipient]) => Self::Share {
                file: file.to_string(),
                recipient: recipient.to_string(),
            },
            ("unshare", [file, recipient]) => Self::Unshare {
                file: file.to_string(),
                recipient: recipient.to_string(),
            },
            ("list" | "ls", []) => Self::List,
            ("poll", []) => Self::Poll,
            ("help" | "?", []) => Self::Help,
            ("exit" | "quit", []) => Self::Exit,
            (
                "signup" | "login" | "logout" | "add" | "open" | "close" | "push" | "share"
                | "unshare" | "list" | "ls" | "poll" | "help" | "?" | "exit" | "quit",
                _,
            ) => bail!("Wrong number of arguments for '{}'; try 'help'", name),
            _ => bail!("Unknown command '{}'; try 'help'", name),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("login alice").unwrap(),
            Some(Command::Login("alice".to_string()))
        );
        assert_eq!(
            Command::parse("  share report.pdf bob ").unwrap(),
            Some(Command::Share {
                file: "report.pdf".to_string(),
                recipient: "bob".to_string(),
            })
        );
        assert_eq!(
            Command::parse("add ./notes.txt").unwrap(),
            Some(Command::Add {
                source: PathBuf::from("./notes.txt"),
                name: None,
            })
        );
        assert_eq!(Command::parse("ls").unwrap(), Some(Command::List));
        assert_eq!(Command::parse("quit").unwrap(), Some(Command::Exit));
    }

    #[test]
    fn test_blank_line() {
        assert_eq!(Command::parse("").unwrap(), None);
        assert_eq!(Command::parse("   \t").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        let err = Command::parse("share report.pdf").unwrap_err();
        assert!(err.to_string().contains("Wrong number of arguments"));

        let err = Command::parse("frobnicate").unwrap_err();
        assert!(err.to_string().contains("Unknown command"));
    }
}
