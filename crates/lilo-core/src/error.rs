use thiserror::Error;

#[derive(Debug, Error)]
pub enum LiloError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Malformed operation: {0}")]
    MalformedOperation(String),

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("Unknown room: {0}")]
    UnknownRoom(String),

    #[error("User {user_id} is not a member of room {room_id}")]
    NotAMember { room_id: String, user_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LiloError {
    /// Rejections that are dropped without telling the sender.
    ///
    /// A room may have been reclaimed or a user evicted between the client
    /// sending a message and the server handling it, so these are expected.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::UnknownRoom(_) | Self::NotAMember { .. })
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::MalformedOperation(_) => "malformed_operation",
            Self::InvalidRoomId(_) => "invalid_room_id",
            Self::UnknownRoom(_) => "unknown_room",
            Self::NotAMember { .. } => "not_a_member",
            Self::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, LiloError>;
