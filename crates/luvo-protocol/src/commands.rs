//! Luke Roberts command definitions and request encoding
//!
//! Request frame format:
//! ```text
//! [Prefix: 0xA0]
//! [Family: 0x01 = query/config, 0x02 = action]
//! [Opcode: 1 byte]
//! [Payload: fixed length per opcode]
//! ```

use crate::color::Rgb;
use crate::types::{
    DecodeError, ProtocolError, FRAME_PREFIX, MAX_PERCENT, MAX_TEMPERATURE_K, MIN_TEMPERATURE_K,
};

/// Command family byte
pub mod family {
    pub const QUERY: u8 = 0x01;
    pub const ACTION: u8 = 0x02;
}

/// Opcode bytes within their family
pub mod opcode {
    pub const PING: u8 = 0x00;
    pub const QUERY_SCENE: u8 = 0x01;
    pub const IMMEDIATE_LIGHT: u8 = 0x02;
    pub const MODIFY_BRIGHTNESS: u8 = 0x03;
    pub const SELECT_SCENE: u8 = 0x05;
    pub const NEXT_SCENE: u8 = 0x06;
    pub const RELATIVE_BRIGHTNESS: u8 = 0x08;
}

/// Immediate Light flag: payload carries the uplight
pub const FLAG_UPLIGHT: u8 = 0x01;
/// Immediate Light flag: payload carries the downlight
pub const FLAG_DOWNLIGHT: u8 = 0x02;

/// Direction byte values for Next Scene
const DIRECTION_BRIGHTER: u8 = 0x01;
const DIRECTION_DIMMER: u8 = 0xFF;

/// Scene stepping direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Brighter,
    Dimmer,
}

impl Direction {
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Direction::Brighter => DIRECTION_BRIGHTER,
            Direction::Dimmer => DIRECTION_DIMMER,
        }
    }

    #[must_use]
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            DIRECTION_BRIGHTER => Some(Direction::Brighter),
            DIRECTION_DIMMER => Some(Direction::Dimmer),
            _ => None,
        }
    }
}

/// Discriminant of a [`Command`], used to pick the expected reply shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Ping,
    QueryScene,
    ImmediateLight,
    ModifyBrightness,
    SelectScene,
    NextScene,
    RelativeBrightness,
}

/// A request to the lamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    QueryScene {
        id: u8,
    },
    ImmediateLight {
        uplight: Rgb,
        downlight_temp_k: u16,
        downlight_brightness: u8,
    },
    ModifyBrightness {
        percent: u8,
    },
    SelectScene {
        id: u8,
    },
    NextScene {
        direction: Direction,
    },
    RelativeBrightness {
        delta_percent: i8,
    },
}

impl Command {
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Ping => CommandKind::Ping,
            Command::QueryScene { .. } => CommandKind::QueryScene,
            Command::ImmediateLight { .. } => CommandKind::ImmediateLight,
            Command::ModifyBrightness { .. } => CommandKind::ModifyBrightness,
            Command::SelectScene { .. } => CommandKind::SelectScene,
            Command::NextScene { .. } => CommandKind::NextScene,
            Command::RelativeBrightness { .. } => CommandKind::RelativeBrightness,
        }
    }

    /// Copy of this command with every field clamped to the device range
    #[must_use]
    pub fn clamped(&self) -> Self {
        match *self {
            Command::ImmediateLight {
                uplight,
                downlight_temp_k,
                downlight_brightness,
            } => Command::ImmediateLight {
                uplight,
                downlight_temp_k: downlight_temp_k.clamp(MIN_TEMPERATURE_K, MAX_TEMPERATURE_K),
                downlight_brightness: downlight_brightness.min(MAX_PERCENT),
            },
            Command::ModifyBrightness { percent } => Command::ModifyBrightness {
                percent: percent.min(MAX_PERCENT),
            },
            ref other => other.clone(),
        }
    }

    /// Check the hard device limits. Holds for any output of [`Command::clamped`].
    #[allow(clippy::missing_errors_doc)]
    pub fn check_limits(&self) -> Result<(), ProtocolError> {
        match *self {
            Command::ImmediateLight {
                downlight_temp_k,
                downlight_brightness,
                ..
            } => {
                if !(MIN_TEMPERATURE_K..=MAX_TEMPERATURE_K).contains(&downlight_temp_k) {
                    return Err(ProtocolError::InvalidRange(format!(
                        "downlight temperature {downlight_temp_k}K outside {MIN_TEMPERATURE_K}-{MAX_TEMPERATURE_K}K"
                    )));
                }
                if downlight_brightness > MAX_PERCENT {
                    return Err(ProtocolError::InvalidRange(format!(
                        "downlight brightness {downlight_brightness} above {MAX_PERCENT}"
                    )));
                }
                Ok(())
            }
            Command::ModifyBrightness { percent } if percent > MAX_PERCENT => Err(
                ProtocolError::InvalidRange(format!("brightness {percent} above {MAX_PERCENT}")),
            ),
            _ => Ok(()),
        }
    }

    /// Serialize to the wire frame. Out-of-range values are clamped first.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self.clamped() {
            Command::Ping => vec![FRAME_PREFIX, family::ACTION, opcode::PING],
            Command::QueryScene { id } => {
                vec![FRAME_PREFIX, family::QUERY, opcode::QUERY_SCENE, id]
            }
            Command::ImmediateLight {
                uplight,
                downlight_temp_k,
                downlight_brightness,
            } => {
                let mut data = Vec::with_capacity(10);
                data.extend_from_slice(&[
                    FRAME_PREFIX,
                    family::QUERY,
                    opcode::IMMEDIATE_LIGHT,
                    FLAG_UPLIGHT | FLAG_DOWNLIGHT,
                ]);
                data.extend_from_slice(&[uplight.r, uplight.g, uplight.b]);
                data.extend_from_slice(&downlight_temp_k.to_be_bytes());
                data.push(downlight_brightness);
                data
            }
            Command::ModifyBrightness { percent } => {
                vec![FRAME_PREFIX, family::QUERY, opcode::MODIFY_BRIGHTNESS, percent]
            }
            Command::SelectScene { id } => {
                vec![FRAME_PREFIX, family::ACTION, opcode::SELECT_SCENE, id]
            }
            Command::NextScene { direction } => vec![
                FRAME_PREFIX,
                family::ACTION,
                opcode::NEXT_SCENE,
                direction.to_byte(),
            ],
            Command::RelativeBrightness { delta_percent } => vec![
                FRAME_PREFIX,
                family::ACTION,
                opcode::RELATIVE_BRIGHTNESS,
                // Two's complement
                delta_percent.to_be_bytes()[0],
            ],
        }
    }

    /// Parse a request frame, the inverse of [`Command::encode`]
    #[allow(clippy::missing_errors_doc)]
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 3 {
            return Err(DecodeError::TooShort {
                expected: 3,
                actual: data.len(),
            });
        }
        if data[0] != FRAME_PREFIX {
            return Err(DecodeError::UnknownOpcode(data[0]));
        }

        let payload = &data[3..];
        let command = match (data[1], data[2]) {
            (family::ACTION, opcode::PING) => {
                expect_len(payload, 0)?;
                Command::Ping
            }
            (family::QUERY, opcode::QUERY_SCENE) => {
                expect_len(payload, 1)?;
                Command::QueryScene { id: payload[0] }
            }
            (family::QUERY, opcode::IMMEDIATE_LIGHT) => {
                expect_len(payload, 7)?;
                if payload[0] != FLAG_UPLIGHT | FLAG_DOWNLIGHT {
                    return Err(DecodeError::Malformed(format!(
                        "unsupported light flags {:#04X}",
                        payload[0]
                    )));
                }
                Command::ImmediateLight {
                    uplight: Rgb::new(payload[1], payload[2], payload[3]),
                    downlight_temp_k: u16::from_be_bytes([payload[4], payload[5]]),
                    downlight_brightness: payload[6],
                }
            }
            (family::QUERY, opcode::MODIFY_BRIGHTNESS) => {
                expect_len(payload, 1)?;
                Command::ModifyBrightness {
                    percent: payload[0],
                }
            }
            (family::ACTION, opcode::SELECT_SCENE) => {
                expect_len(payload, 1)?;
                Command::SelectScene { id: payload[0] }
            }
            (family::ACTION, opcode::NEXT_SCENE) => {
                expect_len(payload, 1)?;
                let direction = Direction::from_byte(payload[0]).ok_or_else(|| {
                    DecodeError::Malformed(format!("invalid direction {:#04X}", payload[0]))
                })?;
                Command::NextScene { direction }
            }
            (family::ACTION, opcode::RELATIVE_BRIGHTNESS) => {
                expect_len(payload, 1)?;
                Command::RelativeBrightness {
                    delta_percent: i8::from_be_bytes([payload[0]]),
                }
            }
            (_, op) => return Err(DecodeError::UnknownOpcode(op)),
        };

        command.check_limits().map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Ok(command)
    }
}

fn expect_len(payload: &[u8], len: usize) -> Result<(), DecodeError> {
    if payload.len() < len {
        return Err(DecodeError::TooShort {
            expected: len + 3,
            actual: payload.len() + 3,
        });
    }
    if payload.len() > len {
        return Err(DecodeError::Malformed(format!(
            "expected {} payload bytes, got {}",
            len,
            payload.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_select_scene() {
        assert_eq!(
            Command::SelectScene { id: 5 }.encode(),
            vec![0xA0, 0x02, 0x05, 0x05]
        );
    }

    #[test]
    fn test_encode_fixed_frames() {
        assert_eq!(Command::Ping.encode(), vec![0xA0, 0x02, 0x00]);
        assert_eq!(
            Command::QueryScene { id: 0x10 }.encode(),
            vec![0xA0, 0x01, 0x01, 0x10]
        );
        assert_eq!(
            Command::ModifyBrightness { percent: 42 }.encode(),
            vec![0xA0, 0x01, 0x03, 42]
        );
        assert_eq!(
            Command::NextScene {
                direction: Direction::Brighter
            }
            .encode(),
            vec![0xA0, 0x02, 0x06, 0x01]
        );
        assert_eq!(
            Command::NextScene {
                direction: Direction::Dimmer
            }
            .encode(),
            vec![0xA0, 0x02, 0x06, 0xFF]
        );
    }

    #[test]
    fn test_relative_brightness_twos_complement() {
        assert_eq!(
            Command::RelativeBrightness { delta_percent: -10 }.encode(),
            vec![0xA0, 0x02, 0x08, 0xF6]
        );
        assert_eq!(
            Command::RelativeBrightness { delta_percent: 25 }.encode(),
            vec![0xA0, 0x02, 0x08, 0x19]
        );
    }

    #[test]
    fn test_immediate_light_clamps() {
        let frame = Command::ImmediateLight {
            uplight: Rgb::new(10, 20, 30),
            downlight_temp_k: 6500,
            downlight_brightness: 250,
        }
        .encode();
        assert_eq!(
            frame,
            vec![0xA0, 0x01, 0x02, 0x03, 10, 20, 30, 0x0F, 0xA0, 100]
        );

        let frame = Command::ImmediateLight {
            uplight: Rgb::default(),
            downlight_temp_k: 1000,
            downlight_brightness: 50,
        }
        .encode();
        assert_eq!(&frame[7..9], &2700u16.to_be_bytes());
    }

    #[test]
    fn test_modify_brightness_clamps() {
        assert_eq!(
            Command::ModifyBrightness { percent: 200 }.encode(),
            vec![0xA0, 0x01, 0x03, 100]
        );
    }

    #[test]
    fn test_clamped_commands_pass_limits() {
        let cmd = Command::ImmediateLight {
            uplight: Rgb::new(1, 2, 3),
            downlight_temp_k: 0,
            downlight_brightness: 255,
        };
        assert!(cmd.check_limits().is_err());
        assert!(cmd.clamped().check_limits().is_ok());
    }

    #[test]
    fn test_parse_inverts_encode() {
        let commands = [
            Command::Ping,
            Command::QueryScene { id: 3 },
            Command::ImmediateLight {
                uplight: Rgb::new(255, 128, 0),
                downlight_temp_k: 3000,
                downlight_brightness: 80,
            },
            Command::NextScene {
                direction: Direction::Dimmer,
            },
            Command::RelativeBrightness { delta_percent: -128 },
        ];
        for cmd in commands {
            assert_eq!(Command::parse(&cmd.encode()), Ok(cmd));
        }
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(matches!(
            Command::parse(&[0xA0, 0x02]),
            Err(DecodeError::TooShort { .. })
        ));
        assert_eq!(
            Command::parse(&[0xB0, 0x02, 0x00]),
            Err(DecodeError::UnknownOpcode(0xB0))
        );
        assert_eq!(
            Command::parse(&[0xA0, 0x02, 0x7F]),
            Err(DecodeError::UnknownOpcode(0x7F))
        );
        assert!(matches!(
            Command::parse(&[0xA0, 0x02, 0x06, 0x02]),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            Command::parse(&[0xA0, 0x02, 0x05]),
            Err(DecodeError::TooShort { .. })
        ));
    }
}
