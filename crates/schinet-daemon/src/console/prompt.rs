use anyhow::Result;
use dialoguer::{Input, Select};

/// Interactive input used by the operator console.
pub trait Prompter {
    /// Read the next command line.
    fn command(&mut self) -> Result<String>;

    /// Pick one of `items`. `None` when the operator backs out.
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<Option<usize>>;

    /// Read a whole number.
    fn count(&mut self, prompt: &str) -> Result<i64>;
}

/// Terminal prompts backed by `dialoguer`.
#[derive(Debug, Default)]
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn command(&mut self) -> Result<String> {
        let line: String = Input::new()
            .with_prompt(">")
            .allow_empty(true)
            .interact_text()?;
        Ok(line)
    }

    fn select(&mut self, prompt: &str, items: &[String]) -> Result<Option<usize>> {
        let selection = Select::new()
            .with_prompt(format!("{prompt} [Esc to cancel]"))
            .items(items)
            .default(0)
            .interact_opt()?;
        Ok(selection)
    }

    fn count(&mut self, prompt: &str) -> Result<i64> {
        let n: i64 = Input::new()
            .with_prompt(prompt)
            .default(0)
            .interact_text()?;
        Ok(n)
    }
}
