//! Interactive prompt source abstraction
//!
//! Provisioning needs three kinds of operator input: picking a provider,
//! yes/no confirmations, and free text (the ACME contact email). The flows
//! depend on the [`PromptSource`] trait so tests script the answers; the
//! terminal implementation reads stdin.

use std::io::{BufRead, Write};

use crate::Result;

/// Source of interactive operator input
pub trait PromptSource: Send + Sync {
    /// Present an enumerated set of options and return the chosen one
    fn pick_one(&self, question: &str, options: &[&str]) -> Result<String>;

    /// Ask a yes/no question
    fn confirm(&self, question: &str) -> Result<bool>;

    /// Ask for a free-text answer
    fn ask(&self, question: &str) -> Result<String>;
}

/// Prompt source backed by the controlling terminal
#[derive(Debug, Default, Clone)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    fn read_line(&self) -> Result<String> {
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }

    fn flush_prompt(&self, text: &str) -> Result<()> {
        print!("{text}");
        std::io::stdout().flush()?;
        Ok(())
    }
}

impl PromptSource for TerminalPrompt {
    fn pick_one(&self, question: &str, options: &[&str]) -> Result<String> {
        println!("{question}?");
        for (i, option) in options.iter().enumerate() {
            println!("  {}) {}", i + 1, option);
        }
        loop {
            self.flush_prompt("> ")?;
            let answer = self.read_line()?;
            if let Some(option) = parse_selection(&answer, options) {
                return Ok(option.to_string());
            }
            println!("Choose one of: {}", options.join(", "));
        }
    }

    fn confirm(&self, question: &str) -> Result<bool> {
        loop {
            self.flush_prompt(&format!("{question}? [y/n] "))?;
            match self.read_line()?.to_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => continue,
            }
        }
    }

    fn ask(&self, question: &str) -> Result<String> {
        loop {
            self.flush_prompt(&format!("{question}: "))?;
            let answer = self.read_line()?;
            if !answer.is_empty() {
                return Ok(answer);
            }
        }
    }
}

/// Resolve an answer against an enumerated option set
///
/// Accepts either the option text itself or its 1-based index.
fn parse_selection<'a>(answer: &str, options: &[&'a str]) -> Option<&'a str> {
    if let Some(option) = options.iter().find(|o| **o == answer) {
        return Some(option);
    }
    answer
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=options.len()).contains(n))
        .map(|n| options[n - 1])
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted prompt source for tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::Error;

    /// Prompt source answering from pre-seeded queues
    #[derive(Debug, Default)]
    pub struct ScriptedPrompt {
        picks: Mutex<VecDeque<String>>,
        confirms: Mutex<VecDeque<bool>>,
        answers: Mutex<VecDeque<String>>,
    }

    impl ScriptedPrompt {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_pick(self, answer: &str) -> Self {
            self.picks.lock().unwrap().push_back(answer.to_string());
            self
        }

        pub fn with_confirm(self, answer: bool) -> Self {
            self.confirms.lock().unwrap().push_back(answer);
            self
        }

        pub fn with_answer(self, answer: &str) -> Self {
            self.answers.lock().unwrap().push_back(answer.to_string());
            self
        }
    }

    impl PromptSource for ScriptedPrompt {
        fn pick_one(&self, _question: &str, _options: &[&str]) -> Result<String> {
            self.picks
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::precondition("no scripted pick left"))
        }

        fn confirm(&self, _question: &str) -> Result<bool> {
            self.confirms
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::precondition("no scripted confirmation left"))
        }

        fn ask(&self, _question: &str) -> Result<String> {
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::precondition("no scripted answer left"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_by_name() {
        let options = ["minikube", "gcp"];
        assert_eq!(parse_selection("gcp", &options), Some("gcp"));
        assert_eq!(parse_selection("minikube", &options), Some("minikube"));
    }

    #[test]
    fn selection_by_index_is_one_based() {
        let options = ["minikube", "gcp"];
        assert_eq!(parse_selection("1", &options), Some("minikube"));
        assert_eq!(parse_selection("2", &options), Some("gcp"));
        assert_eq!(parse_selection("0", &options), None);
        assert_eq!(parse_selection("3", &options), None);
    }

    #[test]
    fn unknown_selection_is_rejected() {
        let options = ["minikube", "gcp"];
        assert_eq!(parse_selection("aws", &options), None);
        assert_eq!(parse_selection("", &options), None);
    }
}
