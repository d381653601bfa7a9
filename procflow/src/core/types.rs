//! Value types shared by declarations, configuration and jobs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The declared type of an input key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// A plain value passed through as-is.
    #[default]
    Var,
    /// A single file path.
    File,
    /// A single directory path.
    Dir,
    /// A list of file paths.
    Files,
    /// A list of directory paths.
    Dirs,
}

impl InputType {
    /// Returns true if the input refers to paths on disk.
    #[must_use]
    pub fn is_path(&self) -> bool {
        !matches!(self, Self::Var)
    }

    /// Returns true if the input holds a list of paths.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Files | Self::Dirs)
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var => write!(f, "var"),
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Files => write!(f, "files"),
            Self::Dirs => write!(f, "dirs"),
        }
    }
}

impl FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "var" => Ok(Self::Var),
            "file" | "path" => Ok(Self::File),
            "dir" => Ok(Self::Dir),
            "files" | "paths" => Ok(Self::Files),
            "dirs" => Ok(Self::Dirs),
            other => Err(other.to_string()),
        }
    }
}

/// The declared type of an output key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// A plain string value.
    #[default]
    Var,
    /// A file under the job output directory.
    File,
    /// A directory under the job output directory, created before the job runs.
    Dir,
}

impl OutputType {
    /// Returns true if the output refers to a path on disk.
    #[must_use]
    pub fn is_path(&self) -> bool {
        !matches!(self, Self::Var)
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var => write!(f, "var"),
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
        }
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "var" => Ok(Self::Var),
            "file" | "path" => Ok(Self::File),
            "dir" => Ok(Self::Dir),
            other => Err(other.to_string()),
        }
    }
}

/// How a stage uses job signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Always run.
    Off,
    /// Reuse results whose signature is still valid.
    #[default]
    On,
    /// Reuse any successful result that has a signature, without comparing.
    Force,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::On => write!(f, "on"),
            Self::Force => write!(f, "force"),
        }
    }
}

/// What happens when a job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// Record the failure and keep the stage going; the stage ends partial.
    #[default]
    Ignore,
    /// Stop submitting new jobs and fail the stage.
    Halt,
    /// Resubmit until the retry budget is spent.
    Retry,
}

impl fmt::Display for ErrorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::Halt => write!(f, "halt"),
            Self::Retry => write!(f, "retry"),
        }
    }
}
