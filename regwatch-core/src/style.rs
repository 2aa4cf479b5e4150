//! Terminal colour roles.
//!
//! Plain ANSI bright colours so output stays readable on light and dark
//! themes alike.

use colored::{ColoredString, Colorize};

/// Semantic colours for report output.
pub trait Palette {
    fn heading(&self) -> ColoredString;
    fn label(&self) -> ColoredString;
    fn muted(&self) -> ColoredString;
    fn good(&self) -> ColoredString;
    fn caution(&self) -> ColoredString;
    fn bad(&self) -> ColoredString;
}

impl<S: AsRef<str>> Palette for S {
    fn heading(&self) -> ColoredString {
        self.as_ref().bright_blue().bold()
    }

    fn label(&self) -> ColoredString {
        self.as_ref().bright_cyan()
    }

    fn muted(&self) -> ColoredString {
        self.as_ref().bright_black()
    }

    fn good(&self) -> ColoredString {
        self.as_ref().bright_green()
    }

    fn caution(&self) -> ColoredString {
        self.as_ref().bright_yellow()
    }

    fn bad(&self) -> ColoredString {
        self.as_ref().bright_red()
    }
}
