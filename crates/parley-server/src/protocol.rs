//! Client frame protocol.
//!
//! A logical request is uploaded as `START`, any number of parts, then `END`.
//! Frames without a recognised `step` are parts.

use parley_chat::ChatError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    index: Option<i64>,
    #[serde(default)]
    part: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Authenticate and open a session.
    Start { token: String },
    /// One fragment. `index` is the client's 0-based index.
    Part { index: u32, part: String },
    /// Reassemble and run the turn.
    End,
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| ChatError::InvalidInput(format!("malformed frame: {e}")))?;
        match raw.step.as_deref() {
            Some("START") => {
                let token = raw
                    .token
                    .ok_or_else(|| ChatError::InvalidInput("START without token".into()))?;
                Ok(Self::Start { token })
            }
            Some("END") => Ok(Self::End),
            _ => {
                let index = raw
                    .index
                    .ok_or_else(|| ChatError::InvalidInput("part without index".into()))?;
                let index = u32::try_from(index)
                    .ok()
                    .filter(|i| *i < u32::MAX)
                    .ok_or_else(|| ChatError::InvalidInput(format!("part index {index} out of range")))?;
                let part = raw
                    .part
                    .ok_or_else(|| ChatError::InvalidInput("part without payload".into()))?;
                Ok(Self::Part { index, part })
            }
        }
    }

    /// Store index of a part. Index 0 is the session owner record.
    pub fn fragment_index(client_index: u32) -> u32 {
        client_index + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_end() {
        assert_eq!(
            Frame::parse(r#"{"step":"START","token":"abc"}"#).unwrap(),
            Frame::Start {
                token: "abc".into()
            }
        );
        assert_eq!(Frame::parse(r#"{"step":"END"}"#).unwrap(), Frame::End);
    }

    #[test]
    fn part_without_step() {
        assert_eq!(
            Frame::parse(r#"{"index":0,"part":"{\"bot_id\""}"#).unwrap(),
            Frame::Part {
                index: 0,
                part: "{\"bot_id\"".into()
            }
        );
    }

    #[test]
    fn unknown_step_is_a_part() {
        assert!(matches!(
            Frame::parse(r#"{"step":"BODY","index":3,"part":"x"}"#).unwrap(),
            Frame::Part { index: 3, .. }
        ));
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(Frame::parse("not json").is_err());
        assert!(Frame::parse(r#"{"step":"START"}"#).is_err());
        assert!(Frame::parse(r#"{"part":"x"}"#).is_err());
        assert!(Frame::parse(r#"{"index":-1,"part":"x"}"#).is_err());
        assert!(Frame::parse(r#"{"index":1}"#).is_err());
    }

    #[test]
    fn fragment_index_skips_owner_slot() {
        assert_eq!(Frame::fragment_index(0), 1);
        assert_eq!(Frame::fragment_index(41), 42);
    }
}
