use crate::protocol::ServerMessage;
use crate::state::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    User(UserAction),
    Runtime(RuntimeAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    SelectFile(String),
    Edit {
        filename: String,
        text: String,
    },
    Save,
    SubmitPrompt {
        text: String,
        context: Option<String>,
    },
    RequestDiff {
        prompt: String,
        context: Option<String>,
    },
    AcceptDiff {
        filename: String,
    },
    RejectDiff {
        filename: String,
    },
    RefreshFiles,
    UpdateContext {
        context: String,
    },
}

impl UserAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SelectFile(_) => "select file",
            Self::Edit { .. } => "edit",
            Self::Save => "save",
            Self::SubmitPrompt { .. } => "submit prompt",
            Self::RequestDiff { .. } => "request diff",
            Self::AcceptDiff { .. } => "accept diff",
            Self::RejectDiff { .. } => "reject diff",
            Self::RefreshFiles => "refresh files",
            Self::UpdateContext { .. } => "update context",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeAction {
    MessageReceived(ServerMessage),
    MalformedMessage { reason: String },
    ConnectionChanged(ConnectionState),
    RequestTimedOut { generation: u64 },
}

impl From<UserAction> for SessionAction {
    fn from(action: UserAction) -> Self {
        Self::User(action)
    }
}

impl From<RuntimeAction> for SessionAction {
    fn from(action: RuntimeAction) -> Self {
        Self::Runtime(action)
    }
}
