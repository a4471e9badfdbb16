//! Shell command parser.
//!
//! Commands are a verb optionally followed by space-separated arguments.
//! There is no quoting or escaping.

/// Parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the working directory.
    List,
    /// Change directory (`..` or a relative name).
    ChangeDir(String),
    /// Create an empty file if missing.
    Touch(String),
    /// Create a directory if missing.
    MakeDir(String),
    /// Dump a file's bytes.
    Cat(String),
    /// Text with no space and no meaning: sent back as-is.
    Echo(String),
}

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    /// Successfully parsed command.
    Complete(Command),
    /// Unrecognized verb with arguments; nothing is done or answered.
    Unknown,
    /// Known verb with the wrong number of arguments.
    Usage(&'static str),
}

/// Parse a trimmed command line.
pub fn parse(line: &str) -> ParseResult {
    if line == "ls" {
        return ParseResult::Complete(Command::List);
    }

    if !line.contains(' ') {
        return match usage(line) {
            Some(text) => ParseResult::Usage(text),
            None => ParseResult::Complete(Command::Echo(line.to_string())),
        };
    }

    let mut tokens = line.split(' ').filter(|t| !t.is_empty());
    let verb = tokens.next().unwrap_or_default();
    let args: Vec<&str> = tokens.collect();

    let build: fn(String) -> Command = match verb {
        "cd" => Command::ChangeDir,
        "touch" => Command::Touch,
        "mkdir" => Command::MakeDir,
        "cat" => Command::Cat,
        "ls" => return ParseResult::Usage("usage: ls\n"),
        _ => return ParseResult::Unknown,
    };

    match args.as_slice() {
        [arg] => ParseResult::Complete(build(arg.to_string())),
        _ => match usage(verb) {
            Some(text) => ParseResult::Usage(text),
            None => ParseResult::Unknown,
        },
    }
}

/// Usage line for verbs that take exactly one argument.
fn usage(verb: &str) -> Option<&'static str> {
    match verb {
        "cd" => Some("usage: cd <dir|..>\n"),
        "touch" => Some("usage: touch <name>\n"),
        "mkdir" => Some("usage: mkdir <name>\n"),
        "cat" => Some("usage: cat <path>\n"),
        _ => None,
    }
}
