// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Ecosystem Dilemma Engine - Errors

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors reported by an `ExternalSync` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The connection to the store is down.
    #[error("store connection is unavailable")]
    Offline,
    /// A compare-and-retry transaction kept losing the race.
    #[error("transaction on `{path}` gave up after {attempts} attempts")]
    Contention { path: String, attempts: u32 },
}

// ---------------------------------------------------------------------------
// Game errors
// ---------------------------------------------------------------------------

/// Errors surfaced to the presentation layer. None of them is fatal.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("cannot reach the game server")]
    ConnectionUnavailable,

    #[error("you've already made your choice for this round")]
    AlreadySubmitted,

    #[error("the round is closed")]
    RoundClosed,

    #[error("no round is running")]
    NoActiveRound,

    #[error("dilemma index {index} is outside the catalog (len {len})")]
    InvalidDilemmaIndex { index: usize, len: usize },

    #[error("the dilemma catalog is empty")]
    EmptyCatalog,

    #[error("`{0}` is not a valid option, expected A or B")]
    InvalidOption(String),

    #[error("join the game before making a choice")]
    NotJoined,

    #[error("the game is full ({max} players)")]
    SessionFull { max: usize },

    #[error("too much contention on `{path}`, try again")]
    TransactionContention { path: String },

    #[error("no local seat {0}")]
    UnknownSeat(usize),

    #[error("record encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
}

impl GameError {
    /// Rejections caused by the player's own action, as opposed to the store.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::AlreadySubmitted
                | Self::RoundClosed
                | Self::NoActiveRound
                | Self::InvalidOption(_)
                | Self::NotJoined
                | Self::SessionFull { .. }
        )
    }
}

impl From<SyncError> for GameError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Offline => Self::ConnectionUnavailable,
            SyncError::Contention { path, .. } => Self::TransactionContention { path },
        }
    }
}

pub type GameResult<T> = Result<T, GameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_maps_to_connection_unavailable() {
        let err: GameError = SyncError::Offline.into();
        assert!(matches!(err, GameError::ConnectionUnavailable));
        assert!(!err.is_user_facing());
    }

    #[test]
    fn test_contention_keeps_path() {
        let err: GameError =
            SyncError::Contention { path: "global".into(), attempts: 25 }.into();
        match err {
            GameError::TransactionContention { path } => assert_eq!(path, "global"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
