use std::io::{self, BufRead, StdinLock, Stderr, Write};

use log::{debug, warn};

use mdcreate_api::constants::CONFIRM_ATTEMPTS;

/// Asks the operator whether to go ahead.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Yes/no question on a terminal. Anything but an answer starting with `y`
/// or `n` asks again, up to a fixed number of times; then, or when input
/// runs out, the answer is no.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<StdinLock<'static>, Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        TerminalPrompt { input, output }
    }

    fn ask(&mut self, prompt: &str, suffix: &str) -> io::Result<Option<bool>> {
        write!(self.output, "{prompt}{suffix}")?;
        self.output.flush()?;

        let mut answer = String::new();
        if self.input.read_line(&mut answer)? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        Ok(match answer.chars().next() {
            Some('y' | 'Y') => Some(true),
            Some('n' | 'N') => Some(false),
            _ => None,
        })
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, prompt: &str) -> bool {
        let mut suffix = "";
        for _ in 0..CONFIRM_ATTEMPTS {
            match self.ask(prompt, suffix) {
                Ok(Some(answer)) => return answer,
                Ok(None) => suffix = "(y/n) ",
                Err(e) => {
                    debug!("No answer to confirmation prompt: {e}");
                    return false;
                }
            }
        }

        warn!("Assuming 'no'");
        false
    }
}
