use thiserror::Error;

pub type Result<T> = std::result::Result<T, VolumeError>;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Cannot run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Cannot parse mixer output: {0}")]
    Parse(String),
}
