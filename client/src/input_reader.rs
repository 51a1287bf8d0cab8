//! Reads user input from stdin, blocking for the nickname prompt and as a
//! line stream afterwards.

use std::io::{self as stdio, stdout, Write};

use tokio::io::Stdin;
use tokio_util::codec::{FramedRead, LinesCodec};

const QUIT: &str = "/quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Quit,
    Message(String),
    Noop,
}

pub type InputLines = FramedRead<Stdin, LinesCodec>;

pub struct InputReader;

impl InputReader {
    // blocking function to gather user input from std::io::stdin
    // should be called before the runtime starts reading stdin
    pub fn blocking_read(prompt: &str) -> stdio::Result<Option<String>> {
        let mut buf = String::new();

        print!("{prompt} ");
        stdout().flush()?; // stdout is line buffered
        if stdio::stdin().read_line(&mut buf)? == 0 {
            return Ok(None);
        }

        Ok(Some(buf.trim().to_owned()))
    }

    pub fn lines() -> InputLines {
        FramedRead::new(tokio::io::stdin(), LinesCodec::new())
    }

    pub fn parse_input(line: &str) -> Input {
        match line.trim() {
            "" => Input::Noop,
            QUIT => Input::Quit,
            _ => Input::Message(line.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_input_recognizes_quit_and_blank_lines() {
        assert_eq!(InputReader::parse_input("/quit"), Input::Quit);
        assert_eq!(InputReader::parse_input("  /quit "), Input::Quit);
        assert_eq!(InputReader::parse_input("   "), Input::Noop);
        assert_eq!(InputReader::parse_input("hi there"), Input::Message("hi there".into()));
    }

    #[test]
    fn commands_are_only_matched_whole() {
        assert_eq!(InputReader::parse_input("/quitting"), Input::Message("/quitting".into()));
    }
}
