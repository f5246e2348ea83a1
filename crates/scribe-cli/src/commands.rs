use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Files,
    Open(String),
    BeginEdit,
    Save,
    Accept(Option<String>),
    Reject(Option<String>),
    Diff(String),
    Context(String),
    Refresh,
    Show,
    Log,
    Diagnostics,
    Help,
    Quit,
    Prompt(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{0} requires an argument")]
    MissingArgument(&'static str),

    #[error("unknown command: {0} (try /help)")]
    Unknown(String),
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Prompt(line.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    let optional = (!argument.is_empty()).then(|| argument.to_string());

    let command = match name {
        "files" | "ls" => Command::Files,
        "open" => Command::Open(required("/open", argument)?),
        "edit" => Command::BeginEdit,
        "save" => Command::Save,
        "accept" => Command::Accept(optional),
        "reject" => Command::Reject(optional),
        "diff" => Command::Diff(required("/diff", argument)?),
        "context" => Command::Context(required("/context", argument)?),
        "refresh" => Command::Refresh,
        "show" => Command::Show,
        "log" => Command::Log,
        "diag" => Command::Diagnostics,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(CommandError::Unknown(format!("/{other}"))),
    };
    Ok(command)
}

fn required(command: &'static str, argument: &str) -> Result<String, CommandError> {
    if argument.is_empty() {
        return Err(CommandError::MissingArgument(command));
    }
    Ok(argument.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Edited(String),
}

/// Line discipline for stdin: commands, or raw text lines while `/edit` is
/// collecting a replacement buffer (ended by a line holding a single `.`).
#[derive(Debug, Default)]
pub struct InputState {
    editing: Option<Vec<String>>,
}

impl InputState {
    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn feed(&mut self, line: &str) -> Result<Option<Input>, CommandError> {
        if let Some(lines) = self.editing.as_mut() {
            if line.trim_end() == "." {
                let text = lines.join("\n");
                self.editing = None;
                return Ok(Some(Input::Edited(text)));
            }
            lines.push(line.to_string());
            return Ok(None);
        }

        let command = parse_command(line)?;
        if command == Command::BeginEdit {
            self.editing = Some(Vec::new());
        }
        Ok(Some(Input::Command(command)))
    }
}

pub const HELP: &str = "\
commands:
  /files            list files
  /open NAME        switch to a file
  /edit             replace the active buffer (finish with a line holding '.')
  /save             upload the active buffer
  /diff PROMPT      ask for a diff against the active buffer
  /accept [NAME]    apply the pending diff
  /reject [NAME]    discard the pending diff
  /context TEXT     set context sent with prompts
  /refresh          reload the file list
  /show             print the active file
  /log              print the conversation
  /diag             print diagnostics
  /quit             exit
anything else is sent as a prompt";
