use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serial error: {0}")]
    SerialError(#[from] serialport::Error),

    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Prompt error: {0}")]
    PromptError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Serial port {0} does not exist on this controller")]
    PortMissing(String),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Timeout occurred while {action}")]
    Timeout { action: String },
}

// Helper methods for error context
impl CoreError {
    pub fn timeout(action: impl Into<String>) -> Self {
        Self::Timeout {
            action: action.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::TemplateError(message.into())
    }
}
