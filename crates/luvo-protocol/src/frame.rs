//! Reply frames and their decoding
//!
//! Reply format:
//! ```text
//! [Status: 1 byte] (0x00 = success, 0x80-0xFF = device error code)
//! [Payload: shape depends on the request]
//! ```
//!
//! | Request     | Payload after status                              |
//! |-------------|---------------------------------------------------|
//! | Ping        | `MM [mm ...]` API version major, minor            |
//! | Query Scene | `II NN <utf-8 name> [00 BB]` id, next id, name, brightness |
//! | others      | empty                                             |
//!
//! The scene name runs to the end of the reply or to the first NUL. Firmware
//! that reports scene brightness appends it after that NUL.

use crate::commands::CommandKind;
use crate::types::{DecodeError, MAX_PERCENT, SCENE_CHAIN_END, STATUS_OK};

/// Lowest status byte the device uses for error codes
pub const MIN_ERROR_CODE: u8 = 0x80;

/// Minimum Query Scene reply: status + id + next id
pub const MIN_SCENE_REPLY: usize = 3;

/// Decoded reply from the lamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    PingAck {
        api_version: (u8, u8),
    },
    SceneInfo {
        id: u8,
        name: String,
        /// Brightness in percent, if the firmware reports it
        brightness: Option<u8>,
        /// Next scene in the device's list, `None` at the end
        next_id: Option<u8>,
    },
    Ack,
    Error {
        code: u8,
    },
}

impl Response {
    /// Decode a reply to a request of kind `expected`
    #[allow(clippy::missing_errors_doc)]
    pub fn decode(data: &[u8], expected: CommandKind) -> Result<Self, DecodeError> {
        let Some(&status) = data.first() else {
            return Err(DecodeError::TooShort {
                expected: 1,
                actual: 0,
            });
        };

        if status >= MIN_ERROR_CODE {
            return Ok(Response::Error { code: status });
        }
        if status != STATUS_OK {
            return Err(DecodeError::UnknownOpcode(status));
        }

        match expected {
            CommandKind::Ping => match data.len() {
                0 | 1 => Err(DecodeError::TooShort {
                    expected: 2,
                    actual: data.len(),
                }),
                // Older firmware only reports the major version
                2 => Ok(Response::PingAck {
                    api_version: (data[1], 0),
                }),
                // Anything past the minor version is ignored
                _ => Ok(Response::PingAck {
                    api_version: (data[1], data[2]),
                }),
            },
            CommandKind::QueryScene => {
                if data.len() < MIN_SCENE_REPLY {
                    return Err(DecodeError::TooShort {
                        expected: MIN_SCENE_REPLY,
                        actual: data.len(),
                    });
                }
                let payload = &data[MIN_SCENE_REPLY..];
                let (name, brightness) = match payload.iter().position(|&b| b == 0) {
                    Some(end) => (&payload[..end], payload.get(end + 1).copied()),
                    None => (payload, None),
                };
                if let Some(brightness) = brightness.filter(|&b| b > MAX_PERCENT) {
                    return Err(DecodeError::Malformed(format!(
                        "scene brightness {brightness} above {MAX_PERCENT}"
                    )));
                }
                let name = std::str::from_utf8(name)
                    .map_err(|e| DecodeError::Malformed(format!("scene name: {e}")))?
                    .to_string();
                let next_id = (data[2] != SCENE_CHAIN_END).then_some(data[2]);

                Ok(Response::SceneInfo {
                    id: data[1],
                    name,
                    brightness,
                    next_id,
                })
            }
            CommandKind::ImmediateLight
            | CommandKind::ModifyBrightness
            | CommandKind::SelectScene
            | CommandKind::NextScene
            | CommandKind::RelativeBrightness => {
                if data.len() == 1 {
                    Ok(Response::Ack)
                } else {
                    Err(DecodeError::Malformed(format!(
                        "{expected:?} reply has {} bytes",
                        data.len()
                    )))
                }
            }
        }
    }

    /// Serialize as the device would send it
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::PingAck {
                api_version: (major, minor),
            } => vec![STATUS_OK, *major, *minor],
            Response::SceneInfo {
                id,
                name,
                brightness,
                next_id,
            } => {
                let mut data = Vec::with_capacity(MIN_SCENE_REPLY + name.len() + 2);
                data.extend_from_slice(&[STATUS_OK, *id, next_id.unwrap_or(SCENE_CHAIN_END)]);
                data.extend_from_slice(name.as_bytes());
                if let Some(brightness) = brightness {
                    data.extend_from_slice(&[0x00, *brightness]);
                }
                data
            }
            Response::Ack => vec![STATUS_OK],
            Response::Error { code } => vec![*code],
        }
    }
}
