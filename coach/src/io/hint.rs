//! Operator hint channel used while a training session is paused.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::types::{ActionEvent, LoopSignal};

/// Words that abort training when entered as the whole reply.
const QUIT_WORDS: [&str; 3] = ["quit", "exit", "stop"];

/// Number of trailing actions shown in the pause banner.
const RECENT_ACTIONS: usize = 5;

/// What the operator is shown when the agent gets stuck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintPrompt {
    pub task: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub signal: LoopSignal,
    /// Trailing actions of the stuck attempt, oldest first.
    pub recent: Vec<ActionEvent>,
}

impl HintPrompt {
    pub fn new(
        task: &str,
        iteration: u32,
        max_iterations: u32,
        signal: LoopSignal,
        attempt_trace: &[ActionEvent],
    ) -> Self {
        let start = attempt_trace.len().saturating_sub(RECENT_ACTIONS);
        Self {
            task: task.to_string(),
            iteration,
            max_iterations,
            signal,
            recent: attempt_trace[start..].to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintReply {
    Hint(String),
    Quit,
}

/// Blocking request/response boundary between the supervisor and the operator.
pub trait HintSource {
    fn request_hint(&mut self, prompt: &HintPrompt) -> Result<HintReply>;
}

/// Interpret one line of operator input. `None` means the line was blank.
pub fn parse_reply(line: &str) -> Option<HintReply> {
    let text = line.trim();
    if text.is_empty() {
        return None;
    }
    if QUIT_WORDS
        .iter()
        .any(|word| text.eq_ignore_ascii_case(word))
    {
        return Some(HintReply::Quit);
    }
    Some(HintReply::Hint(text.to_string()))
}

/// Banner printed when the agent is paused.
pub fn render_pause_banner(prompt: &HintPrompt) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    out.push_str(&format!("\n{rule}\n"));
    out.push_str("AGENT NEEDS HELP\n");
    out.push_str(&format!("{rule}\n"));
    out.push_str(&format!("Task: {}\n", prompt.task));
    out.push_str(&format!(
        "Attempt: {}/{}\n",
        prompt.iteration, prompt.max_iterations
    ));
    out.push_str(&format!(
        "Reason: {} ({})\n",
        prompt.signal.reason.as_str(),
        prompt.signal.describe()
    ));
    if let Some(last) = prompt.recent.last() {
        out.push_str(&format!("Stuck at step: {}\n", last.index));
    }
    if !prompt.recent.is_empty() {
        out.push_str("Recent actions:\n");
        for event in &prompt.recent {
            out.push_str(&format!("  {}. {}\n", event.index, event.label()));
        }
    }
    out.push_str(&format!("{rule}\n"));
    out.push_str("Type a hint for the agent, or 'quit' to stop training.\n");
    out
}

/// Hint source reading from the process's stdin.
///
/// Lines are read by a background thread so a configured timeout can be
/// honored. End of input and timeouts both count as `quit`. Input typed while
/// the agent was running is discarded when the next pause begins.
pub struct ConsoleHintSource {
    lines: Receiver<String>,
    timeout: Option<Duration>,
}

impl ConsoleHintSource {
    pub fn new(timeout: Option<Duration>) -> Self {
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_receiver(lines, timeout)
    }

    fn from_receiver(lines: Receiver<String>, timeout: Option<Duration>) -> Self {
        Self { lines, timeout }
    }

    fn discard_pending(&self) {
        let mut discarded = 0usize;
        loop {
            match self.lines.try_recv() {
                Ok(_) => discarded += 1,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        if discarded > 0 {
            debug!(discarded, "dropped input typed before the pause");
        }
    }

    fn next_line(&self) -> Result<Option<String>> {
        match self.timeout {
            Some(timeout) => match self.lines.recv_timeout(timeout) {
                Ok(line) => Ok(Some(line)),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(timeout_secs = timeout.as_secs(), "hint timed out");
                    Ok(None)
                }
                Err(RecvTimeoutError::Disconnected) => Ok(None),
            },
            None => Ok(self.lines.recv().ok()),
        }
    }
}

impl HintSource for ConsoleHintSource {
    fn request_hint(&mut self, prompt: &HintPrompt) -> Result<HintReply> {
        self.discard_pending();
        print!("{}", render_pause_banner(prompt));
        loop {
            print!("hint> ");
            std::io::stdout().flush().context("flush stdout")?;
            let Some(line) = self.next_line()? else {
                info!("no operator input, treating as quit");
                println!();
                return Ok(HintReply::Quit);
            };
            match parse_reply(&line) {
                Some(reply) => {
                    debug!(reply = ?reply, "operator replied");
                    return Ok(reply);
                }
                None => println!("(empty hint ignored; type 'quit' to stop)"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ActionKind, LoopReason};
    use crate::test_support::{event, trace_of};

    #[test]
    fn quit_words_are_case_insensitive() {
        assert_eq!(parse_reply("quit"), Some(HintReply::Quit));
        assert_eq!(parse_reply("  EXIT \n"), Some(HintReply::Quit));
        assert_eq!(parse_reply("Stop"), Some(HintReply::Quit));
        assert_eq!(
            parse_reply("stop scrolling and click Customers"),
            Some(HintReply::Hint("stop scrolling and click Customers".to_string()))
        );
    }

    #[test]
    fn blank_reply_is_not_a_hint() {
        assert_eq!(parse_reply("   "), None);
    }

    fn scroll_prompt() -> HintPrompt {
        let trace = trace_of(
            (0..4)
                .map(|_| event(ActionKind::Scroll, Some("page")))
                .collect(),
        );
        let signal = LoopSignal::stuck(LoopReason::ScrollLoop, trace.clone());
        HintPrompt::new("find customers", 1, 5, signal, &trace)
    }

    #[test]
    fn timeout_counts_as_quit() {
        let (_tx, rx) = mpsc::channel::<String>();
        let mut source = ConsoleHintSource::from_receiver(rx, Some(Duration::from_millis(20)));
        assert_eq!(
            source.request_hint(&scroll_prompt()).expect("reply"),
            HintReply::Quit
        );
    }

    #[test]
    fn end_of_input_counts_as_quit() {
        let (tx, rx) = mpsc::channel::<String>();
        drop(tx);
        let mut source = ConsoleHintSource::from_receiver(rx, None);
        assert_eq!(
            source.request_hint(&scroll_prompt()).expect("reply"),
            HintReply::Quit
        );
    }

    #[test]
    fn blank_reply_is_asked_again() {
        let (tx, rx) = mpsc::channel::<String>();
        let mut source = ConsoleHintSource::from_receiver(rx, Some(Duration::from_secs(5)));
        let operator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send("   ".to_string()).expect("send blank");
            tx.send("click the Customers link".to_string()).expect("send hint");
        });
        let reply = source.request_hint(&scroll_prompt()).expect("reply");
        operator.join().expect("operator thread");
        assert_eq!(reply, HintReply::Hint("click the Customers link".to_string()));
    }

    #[test]
    fn input_typed_before_the_pause_is_discarded() {
        let (tx, rx) = mpsc::channel::<String>();
        tx.send("typed while the agent was running".to_string()).expect("send");
        let mut source = ConsoleHintSource::from_receiver(rx, Some(Duration::from_millis(20)));
        assert_eq!(
            source.request_hint(&scroll_prompt()).expect("reply"),
            HintReply::Quit
        );
        drop(tx);
    }

    #[test]
    fn banner_shows_reason_and_recent_actions() {
        let trace = trace_of(
            (0..7)
                .map(|_| event(ActionKind::Scroll, Some("page")))
                .collect(),
        );
        let signal = LoopSignal::stuck(LoopReason::ScrollLoop, trace[3..].to_vec());
        let prompt = HintPrompt::new("find customers", 2, 5, signal, &trace);
        assert_eq!(prompt.recent.len(), 5);

        let banner = render_pause_banner(&prompt);
        assert!(banner.contains("Attempt: 2/5"));
        assert!(banner.contains("Reason: scroll_loop (scrolling 4 times without progress)"));
        assert!(banner.contains("Stuck at step: 7"));
        assert!(banner.contains("  3. scroll 'page'"));
        assert!(!banner.contains("  2. scroll"));
    }
}
