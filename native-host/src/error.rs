use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error on the messaging pipe: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {0} bytes exceeds the native-messaging limit")]
    FrameTooLarge(usize),

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Scenecraft(#[from] scenecraft::ScenecraftError),
}
