use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// Canonical textual encoding of a board state (FEN).
///
/// Used verbatim as the engine `position fen` argument and as the cloud
/// lookup key, so it must fit on a single protocol line.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Position(String);

impl Position {
    pub fn new(text: impl Into<String>) -> Result<Self, EvalError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EvalError::InvalidPosition("empty position".to_string()));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(EvalError::InvalidPosition(format!(
                "control character in {trimmed:?}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Position {
    type Error = EvalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Position> for String {
    fn from(value: Position) -> Self {
        value.0
    }
}

impl std::str::FromStr for Position {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Score of an evaluation, from the side to move's point of view.
///
/// `Unanalyzed` is kept distinct from `Centipawns(0)`: a balanced position
/// and a position nobody looked at must never compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    Unanalyzed,
    Centipawns(i32),
    /// Mate in N moves; negative when the side to move is being mated.
    Mate(i32),
}

impl Score {
    pub fn centipawns(self) -> Option<i32> {
        match self {
            Score::Centipawns(cp) => Some(cp),
            _ => None,
        }
    }

    pub fn mate_in(self) -> Option<i32> {
        match self {
            Score::Mate(n) => Some(n),
            _ => None,
        }
    }
}

/// Where an evaluation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cloud,
    Local,
}

/// Result of evaluating one position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub position: Position,
    pub score: Score,
    /// Search depth reached. 0 means no analysis was performed.
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_move: Option<String>,
    pub source: Source,
}

impl Evaluation {
    /// Zero-confidence result returned when no analysis could be performed.
    pub fn unanalyzed(position: Position) -> Self {
        Self {
            position,
            score: Score::Unanalyzed,
            depth: 0,
            best_move: None,
            source: Source::Local,
        }
    }

    /// Consumers must branch on this rather than on a zero score.
    pub fn is_analyzed(&self) -> bool {
        self.depth > 0 && self.score != Score::Unanalyzed
    }

    pub fn score_cp(&self) -> Option<i32> {
        self.score.centipawns()
    }

    pub fn mate_in(&self) -> Option<i32> {
        self.score.mate_in()
    }
}

/// Parse the move token of a `bestmove` line or pv head.
///
/// `(none)` and `0000` are what engines print when the side to move has no
/// legal move.
pub fn parse_move_token(token: &str) -> Option<String> {
    match token {
        "" | "(none)" | "0000" => None,
        mv => Some(mv.to_string()),
    }
}
