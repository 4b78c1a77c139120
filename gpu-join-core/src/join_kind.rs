use std::fmt;
use std::str::FromStr;

use crate::status::JoinError;

/// Which unmatched rows a join keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Outer,
}

impl JoinKind {
    /// Integer code used by the flat API.
    pub fn code(self) -> i32 {
        match self {
            JoinKind::Inner => 0,
            JoinKind::Left => 1,
            JoinKind::Outer => 2,
        }
    }

    /// Left rows without a match produce `(left, -1)`.
    pub fn emits_unmatched_left(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Outer)
    }

    /// Right rows without a match produce `(-1, right)`.
    pub fn emits_unmatched_right(self) -> bool {
        self == JoinKind::Outer
    }
}

impl TryFrom<i32> for JoinKind {
    type Error = JoinError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(JoinKind::Inner),
            1 => Ok(JoinKind::Left),
            2 => Ok(JoinKind::Outer),
            other => Err(JoinError::InvalidJoinKind(format!("code {}", other))),
        }
    }
}

impl FromStr for JoinKind {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            "outer" => Ok(JoinKind::Outer),
            _ => Err(JoinError::InvalidJoinKind(format!("{:?}", s))),
        }
    }
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Outer => "OUTER",
        })
    }
}
