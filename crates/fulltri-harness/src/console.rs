//! Single-line command console typed into the render window.
//!
//! Commands have the form `param value`. The console only edits the line and
//! produces the terminal echo; applying a command is up to the caller.

use std::io::{self, Write};

/// Width blanked out when a recalled command replaces the current line.
const CLEAR_WIDTH: usize = 42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub param: String,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct Console {
    line: String,
    previous: String,
    echo: String,
}

impl Console {
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Appends typed characters. Characters outside Latin-1 are dropped.
    pub fn push_text(&mut self, text: &str) {
        for c in text.chars().filter(|c| u32::from(*c) < 256) {
            self.line.push(c);
            self.echo.push(c);
        }
    }

    pub fn backspace(&mut self) {
        if self.line.pop().is_some() {
            self.echo.push_str("\u{8} \u{8}");
        }
    }

    /// Replaces the line with the last entered command.
    pub fn recall_previous(&mut self) {
        self.echo.push('\r');
        self.echo.extend(std::iter::repeat_n(' ', CLEAR_WIDTH));
        self.echo.push('\r');
        self.line.clone_from(&self.previous);
        self.echo.push_str(&self.line);
    }

    /// Ends the line. Returns the command when the line has a `param value`
    /// shape; a line without a space is dropped.
    pub fn enter(&mut self) -> Option<Command> {
        self.echo.push('\n');
        let line = std::mem::take(&mut self.line);
        self.previous.clone_from(&line);

        let (param, value) = line.split_once(' ')?;
        Some(Command {
            param: param.to_string(),
            value: value.to_string(),
        })
    }

    /// Takes the echo produced since the last call.
    pub fn take_echo(&mut self) -> String {
        std::mem::take(&mut self.echo)
    }

    /// Writes pending echo to stdout.
    pub fn flush_echo(&mut self) -> io::Result<()> {
        if self.echo.is_empty() {
            return Ok(());
        }
        let mut out = io::stdout().lock();
        out.write_all(self.take_echo().as_bytes())?;
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_text_is_echoed() {
        let mut c = Console::default();
        c.push_text("ab");
        c.push_text("c");
        assert_eq!(c.line(), "abc");
        assert_eq!(c.take_echo(), "abc");
        assert_eq!(c.take_echo(), "");
    }

    #[test]
    fn non_latin1_is_dropped() {
        let mut c = Console::default();
        c.push_text("é€x");
        assert_eq!(c.line(), "éx");
    }

    #[test]
    fn backspace_erases_last_char() {
        let mut c = Console::default();
        c.push_text("ab");
        c.take_echo();
        c.backspace();
        assert_eq!(c.line(), "a");
        assert_eq!(c.take_echo(), "\u{8} \u{8}");
    }

    #[test]
    fn backspace_on_empty_line_is_silent() {
        let mut c = Console::default();
        c.backspace();
        assert_eq!(c.line(), "");
        assert_eq!(c.take_echo(), "");
    }

    #[test]
    fn enter_splits_at_first_space() {
        let mut c = Console::default();
        c.push_text("displayCpu true story");
        let cmd = c.enter().unwrap();
        assert_eq!(cmd.param, "displayCpu");
        assert_eq!(cmd.value, "true story");
        assert_eq!(c.line(), "");
        assert!(c.take_echo().ends_with('\n'));
    }

    #[test]
    fn line_without_space_is_discarded_but_remembered() {
        let mut c = Console::default();
        c.push_text("help");
        assert_eq!(c.enter(), None);
        assert_eq!(c.line(), "");

        c.recall_previous();
        assert_eq!(c.line(), "help");
    }

    #[test]
    fn recall_clears_the_terminal_line() {
        let mut c = Console::default();
        c.push_text("displayCpu false");
        c.enter();
        c.push_text("junk");
        c.take_echo();

        c.recall_previous();
        assert_eq!(c.line(), "displayCpu false");
        let echo = c.take_echo();
        assert_eq!(echo, format!("\r{}\rdisplayCpu false", " ".repeat(CLEAR_WIDTH)));
    }
}
