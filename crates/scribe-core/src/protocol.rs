//! Wire codec for the agent session socket.
//!
//! Outgoing requests are a closed enum serialized as `{"action": ..., ...}`.
//! Incoming payloads are validated here and turned into [`ServerMessage`];
//! anything that does not fit is rejected with a [`ProtocolError`] so the
//! reducer never sees untyped JSON.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object message")]
    NotAnObject,

    #[error("missing or non-string status field")]
    MissingStatus,

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("invalid {action} payload: {reason}")]
    InvalidPayload { action: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientRequest {
    Prompt {
        prompt: String,
        #[serde(rename = "activeFile", default, skip_serializing_if = "Option::is_none")]
        active_file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    GenerateDiff {
        prompt: String,
        filename: String,
        current_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
    ApplyDiff {
        filename: String,
        diff: String,
    },
    UploadFile {
        filename: String,
        content: String,
    },
    ReadFile {
        filename: String,
    },
    ListFiles,
    UpdateContext {
        context: String,
    },
}

impl ClientRequest {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Prompt { .. } => "prompt",
            Self::GenerateDiff { .. } => "generate_diff",
            Self::ApplyDiff { .. } => "apply_diff",
            Self::UploadFile { .. } => "upload_file",
            Self::ReadFile { .. } => "read_file",
            Self::ListFiles => "list_files",
            Self::UpdateContext { .. } => "update_context",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Success(ServerEvent),
    Failure(ServerFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFailure {
    pub action: Option<String>,
    pub error: String,
    pub filename: Option<String>,
}

impl ServerFailure {
    pub fn is_apply_failure(&self) -> bool {
        self.action.as_deref() == Some(APPLY_DIFF_ERROR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    InitialState {
        files: Vec<String>,
        active_file: Option<String>,
    },
    FileList {
        files: Vec<String>,
    },
    FileContent {
        filename: String,
        content: String,
    },
    FileCreated {
        filename: String,
        content: String,
        files: Option<Vec<String>>,
    },
    DiffGenerated {
        filename: Option<String>,
        diff: Option<String>,
        old_code: String,
        new_code: String,
    },
    DiffApplied {
        filename: String,
        new_code: String,
    },
    FileUploaded {
        filename: Option<String>,
        files: Option<Vec<String>>,
    },
    Unrecognized {
        action: Option<String>,
    },
}

impl ServerEvent {
    pub fn action(&self) -> &str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::FileList { .. } => "file_list",
            Self::FileContent { .. } => "file_content",
            Self::FileCreated { .. } => "file_created",
            Self::DiffGenerated { .. } => "diff_generated",
            Self::DiffApplied { .. } => "diff_applied",
            Self::FileUploaded { .. } => "file_uploaded",
            Self::Unrecognized { action } => action.as_deref().unwrap_or("<none>"),
        }
    }
}

pub const APPLY_DIFF_ERROR: &str = "apply_diff_error";
const UNKNOWN_ERROR: &str = "unknown error";

pub fn encode_request(request: &ClientRequest) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(request)?)
}

pub fn decode_message(text: &str) -> Result<ServerMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(object) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let status = match object.get("status") {
        Some(Value::String(status)) => status.clone(),
        _ => return Err(ProtocolError::MissingStatus),
    };
    let action = match object.get("action") {
        None | Some(Value::Null) => None,
        Some(Value::String(action)) => Some(action.clone()),
        Some(_) => {
            return Err(ProtocolError::InvalidPayload {
                action: "<unknown>".to_string(),
                reason: "action must be a string".to_string(),
            })
        }
    };

    match status.as_str() {
        "success" => decode_event(action, object).map(ServerMessage::Success),
        "error" => decode_failure(action, object).map(ServerMessage::Failure),
        other => Err(ProtocolError::UnknownStatus(other.to_string())),
    }
}

#[derive(Deserialize)]
struct InitialStatePayload {
    files: Vec<String>,
    #[serde(rename = "activeFile", default)]
    active_file: Option<String>,
}

#[derive(Deserialize)]
struct FileListPayload {
    files: Vec<String>,
}

#[derive(Deserialize)]
struct FileContentPayload {
    filename: String,
    content: String,
}

#[derive(Deserialize)]
struct FileCreatedPayload {
    filename: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    files: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct DiffGeneratedPayload {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    diff: Option<String>,
    #[serde(default)]
    old_code: Option<String>,
    #[serde(default)]
    new_code: Option<String>,
}

#[derive(Deserialize)]
struct DiffAppliedPayload {
    filename: String,
    new_code: String,
}

#[derive(Deserialize)]
struct FileUploadedPayload {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    files: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct FailurePayload {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

fn decode_event(
    action: Option<String>,
    object: Map<String, Value>,
) -> Result<ServerEvent, ProtocolError> {
    let Some(action) = action else {
        return Ok(ServerEvent::Unrecognized { action: None });
    };

    let event = match action.as_str() {
        "initial_state" => {
            let payload: InitialStatePayload = payload(&action, object)?;
            ServerEvent::InitialState {
                files: payload.files,
                active_file: payload.active_file,
            }
        }
        "file_list" => {
            let payload: FileListPayload = payload(&action, object)?;
            ServerEvent::FileList {
                files: payload.files,
            }
        }
        "file_content" => {
            let payload: FileContentPayload = payload(&action, object)?;
            ServerEvent::FileContent {
                filename: payload.filename,
                content: payload.content,
            }
        }
        "file_created" => {
            let payload: FileCreatedPayload = payload(&action, object)?;
            let Some(content) = payload.content.or(payload.code) else {
                return Err(ProtocolError::InvalidPayload {
                    action,
                    reason: "missing field `content`".to_string(),
                });
            };
            ServerEvent::FileCreated {
                filename: payload.filename,
                content,
                files: payload.files,
            }
        }
        "diff_generated" => {
            let payload: DiffGeneratedPayload = payload(&action, object)?;
            ServerEvent::DiffGenerated {
                filename: payload.filename,
                diff: payload.diff,
                old_code: payload.old_code.unwrap_or_default(),
                new_code: payload.new_code.unwrap_or_default(),
            }
        }
        "diff_applied" => {
            let payload: DiffAppliedPayload = payload(&action, object)?;
            ServerEvent::DiffApplied {
                filename: payload.filename,
                new_code: payload.new_code,
            }
        }
        "file_uploaded" => {
            let payload: FileUploadedPayload = payload(&action, object)?;
            ServerEvent::FileUploaded {
                filename: payload.filename,
                files: payload.files,
            }
        }
        _ => ServerEvent::Unrecognized {
            action: Some(action),
        },
    };
    Ok(event)
}

fn decode_failure(
    action: Option<String>,
    object: Map<String, Value>,
) -> Result<ServerFailure, ProtocolError> {
    let label = action.clone().unwrap_or_else(|| "error".to_string());
    let payload: FailurePayload = payload(&label, object)?;
    Ok(ServerFailure {
        action,
        error: payload
            .error
            .filter(|error| !error.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        filename: payload.filename,
    })
}

fn payload<T: DeserializeOwned>(
    action: &str,
    object: Map<String, Value>,
) -> Result<T, ProtocolError> {
    serde_json::from_value(Value::Object(object)).map_err(|err| ProtocolError::InvalidPayload {
        action: action.to_string(),
        reason: err.to_string(),
    })
}
