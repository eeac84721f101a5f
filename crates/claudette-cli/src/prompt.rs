use anyhow::Result;

pub mod cliclack;
pub mod rustyline;
pub mod thinking;

pub trait Prompt {
    /// Render a model answer as markdown
    fn render(&mut self, text: &str);
    fn render_thinking(&self, thinking: &str);
    fn render_info(&self, text: &str);
    fn render_error(&self, text: &str);
    fn get_input(&mut self) -> Result<Input>;
    fn show_busy(&mut self);
    /// Replace the busy indicator's text, e.g. with download progress
    fn update_busy(&self, status: &str);
    fn hide_busy(&self);
    fn close(&self);
    fn claudette_ready(&self, model: &str) {
        println!();
        println!("Claudette is running on {}. Type /help for the list of commands.", model);
        println!();
    }
}

pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Optional content as sometimes the user may be issuing a command eg. (Exit)
}

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message or a slash command
    Exit,     // User wants to exit the session
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn bat_theme(self) -> &'static str {
        match self {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }
}
