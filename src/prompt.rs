use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What the operator answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A line of input, trimmed.
    Line(String),
    /// Ctrl-C or end of input.
    Interrupted,
}

/// Line-oriented operator I/O.
pub trait Prompt {
    fn ask(&mut self, question: &str) -> Reply;
    fn say(&mut self, line: &str);
}

/// Ask a yes/no question; anything but `y`/`yes` (or an interrupt) is a no.
pub fn confirm(prompt: &mut dyn Prompt, question: &str) -> bool {
    match prompt.ask(question) {
        Reply::Line(answer) => answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"),
        Reply::Interrupted => false,
    }
}

// Install the Ctrl-C handler. The first press raises the flag; a second one exits outright,
// since a pending remote call cannot be cancelled. Returns the flag even if a handler was
// already installed elsewhere.
pub fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    {
        let flag = flag.clone();
        let _ = ctrlc::set_handler(move || {
            if flag.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
        });
    }
    flag
}

/// Terminal prompt. A reader thread forwards stdin lines so a pending question can be
/// abandoned when the interrupt flag is raised.
pub struct ConsolePrompt {
    lines: Receiver<Option<String>>,
    interrupted: Arc<AtomicBool>,
}

impl ConsolePrompt {
    pub fn new(interrupted: Arc<AtomicBool>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut handle = stdin.lock();
            loop {
                let mut line = String::new();
                let next = match handle.read_line(&mut line) {
                    Ok(0) | Err(_) => None,
                    Ok(_) => Some(line),
                };
                let done = next.is_none();
                if tx.send(next).is_err() || done {
                    break;
                }
            }
        });
        Self { lines: rx, interrupted }
    }

    // Check if Ctrl-C has been pressed (non-blocking); consumes the signal.
    fn poll_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }
}

impl Prompt for ConsolePrompt {
    fn ask(&mut self, question: &str) -> Reply {
        print!("{question}");
        let _ = io::stdout().flush();
        loop {
            if self.poll_interrupt() {
                println!();
                return Reply::Interrupted;
            }
            match self.lines.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(line)) => return Reply::Line(line.trim().to_string()),
                Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                    println!();
                    return Reply::Interrupted;
                }
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Canned answers for exercising prompt-driven code without a terminal.
#[cfg(test)]
pub(crate) struct ScriptedPrompt {
    answers: std::collections::VecDeque<Reply>,
    pub questions: Vec<String>,
    pub output: Vec<String>,
}

#[cfg(test)]
impl ScriptedPrompt {
    pub(crate) fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| Reply::Line(a.to_string())).collect(),
            questions: Vec::new(),
            output: Vec::new(),
        }
    }

    pub(crate) fn then_interrupt(mut self) -> Self {
        self.answers.push_back(Reply::Interrupted);
        self
    }

    pub(crate) fn transcript(&self) -> String {
        self.output.join("\n")
    }
}

#[cfg(test)]
impl Prompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> Reply {
        self.questions.push(question.to_string());
        // Running out of script behaves like end of input.
        self.answers.pop_front().unwrap_or(Reply::Interrupted)
    }

    fn say(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}
