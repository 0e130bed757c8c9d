// ABOUTME: Input-source abstraction for interactive prompts.
// ABOUTME: Stdin-backed in production; a scripted source drives tests.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use zeroize::Zeroizing;

/// Where the dispatcher reads user input from. Passed in explicitly so no
/// component holds a process-global reader.
pub trait Prompt {
    /// Show `prompt` and read one line. An error (including EOF on the
    /// underlying source) means the source is exhausted and the caller
    /// should wind down.
    fn read_line(&mut self, prompt: &str) -> io::Result<String>;

    /// Read a secret without echoing it back.
    fn read_password(&mut self, prompt: &str) -> io::Result<Zeroizing<String>>;

    /// Ask a yes/no question. Anything other than an explicit yes is no.
    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.read_line(&format!("{question} (Y/N): "))?;
        let answer = answer.trim().to_ascii_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}

/// Interactive terminal input.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn read_line(&mut self, prompt: &str) -> io::Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn read_password(&mut self, prompt: &str) -> io::Result<Zeroizing<String>> {
        rpassword::prompt_password(prompt).map(Zeroizing::new)
    }
}

/// Deterministic input source used by the test suites: answers prompts from
/// a fixed script and reports EOF once the script runs out.
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    fn next(&mut self) -> io::Result<String> {
        self.lines
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }
}

impl Prompt for ScriptedInput {
    fn read_line(&mut self, _prompt: &str) -> io::Result<String> {
        self.next()
    }

    fn read_password(&mut self, _prompt: &str) -> io::Result<Zeroizing<String>> {
        self.next().map(Zeroizing::new)
    }
}
