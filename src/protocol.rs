//! Wire grammar of the receiver's control protocol.
//!
//! Commands are short fixed-width ASCII strings, each wrapped in CR/LF.
//! Status lines are recognised by a literal prefix and decoded by position.

use crate::error::{AvrError, Result};
use crate::types::{ChannelId, SpeakerConfig, VolumeCode, MAX_TEXT_LEN};
use std::fmt;

/// Terminator placed before and after every outbound command
pub const LINE_TERMINATOR: &str = "\r\n";

/// Outbound command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    QueryPower,
    TogglePower,
    QueryVolume,
    SetVolume(VolumeCode),
    VolumeUp,
    VolumeDown,
    QueryActiveInput,
    SetActiveInput(ChannelId),
    QueryInputName(ChannelId),
    RenameInput { channel: ChannelId, name: String },
    QuerySpeakerConfig,
    SetSpeakerConfig(SpeakerConfig),
    QueryDisplayText,
}

impl Command {
    /// Command body without terminators
    pub fn body(&self) -> String {
        match self {
            Command::QueryPower => "?P".to_string(),
            Command::TogglePower => "PZ".to_string(),
            Command::QueryVolume => "?V".to_string(),
            Command::SetVolume(code) => format!("{:03}VL", code),
            Command::VolumeUp => "VU".to_string(),
            Command::VolumeDown => "VD".to_string(),
            Command::QueryActiveInput => "?F".to_string(),
            Command::SetActiveInput(channel) => format!("{:02}FN", channel),
            Command::QueryInputName(channel) => format!("?RGB{:02}", channel),
            Command::RenameInput { channel, name } => {
                format!("{}1RGB{:02}", truncate_name(name), channel)
            }
            Command::QuerySpeakerConfig => "?SPK".to_string(),
            Command::SetSpeakerConfig(config) => format!("{}SPK", config.code()),
            Command::QueryDisplayText => "?FL".to_string(),
        }
    }

    /// Command as written to the socket
    pub fn encode(&self) -> String {
        format!("{LINE_TERMINATOR}{}{LINE_TERMINATOR}", self.body())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body())
    }
}

fn truncate_name(name: &str) -> &str {
    match name.char_indices().nth(MAX_TEXT_LEN) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Kind of status line, identified by its prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Volume,
    Power,
    InputName,
    ActiveInput,
    SpeakerConfig,
    DisplayText,
}

impl MessageKind {
    /// Classification order. The first matching prefix wins.
    pub const ORDER: [MessageKind; 6] = [
        MessageKind::Volume,
        MessageKind::Power,
        MessageKind::InputName,
        MessageKind::ActiveInput,
        MessageKind::SpeakerConfig,
        MessageKind::DisplayText,
    ];

    /// Literal prefix on the wire
    pub fn prefix(self) -> &'static str {
        match self {
            MessageKind::Volume => "VOL",
            MessageKind::Power => "PWR",
            MessageKind::InputName => "RGB",
            MessageKind::ActiveInput => "FN",
            MessageKind::SpeakerConfig => "SPK",
            MessageKind::DisplayText => "FL",
        }
    }

    /// Find the kind of a status line, `None` for lines the client ignores
    pub fn classify(line: &str) -> Option<Self> {
        Self::ORDER
            .into_iter()
            .find(|kind| line.starts_with(kind.prefix()))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Decoded status line
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `VOLnnn`
    Volume(VolumeCode),
    /// `PWRn`, already un-inverted: `true` means on
    Power(bool),
    /// `RGBcc?name`
    InputName { channel: ChannelId, name: String },
    /// `FNcc`
    ActiveInput(ChannelId),
    /// `SPKn`
    SpeakerConfig(SpeakerConfig),
    /// `FLff` followed by 14 hex-encoded characters
    DisplayText(String),
}

impl Message {
    /// Kind this message was decoded from
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Volume(_) => MessageKind::Volume,
            Message::Power(_) => MessageKind::Power,
            Message::InputName { .. } => MessageKind::InputName,
            Message::ActiveInput(_) => MessageKind::ActiveInput,
            Message::SpeakerConfig(_) => MessageKind::SpeakerConfig,
            Message::DisplayText(_) => MessageKind::DisplayText,
        }
    }

    /// Classify and decode a status line.
    ///
    /// Returns `Ok(None)` for lines without a known prefix and
    /// [`AvrError::Decode`] for known prefixes with a malformed body.
    pub fn parse(line: &str) -> Result<Option<Message>> {
        let Some(kind) = MessageKind::classify(line) else {
            return Ok(None);
        };
        Self::decode(kind, line).map(Some)
    }

    fn decode(kind: MessageKind, line: &str) -> Result<Message> {
        let prefix = kind.prefix();
        match kind {
            MessageKind::Volume => {
                let code = number_at(prefix, line, 3..6)?;
                Ok(Message::Volume(code))
            }
            MessageKind::Power => match field(prefix, line, 3..4)? {
                "0" => Ok(Message::Power(true)),
                "1" => Ok(Message::Power(false)),
                other => Err(AvrError::decode(
                    prefix,
                    line,
                    format!("power flag {other:?} is not 0 or 1"),
                )),
            },
            MessageKind::InputName => {
                let channel = number_at(prefix, line, 3..5)?;
                let name = line.get(6..).unwrap_or_default().to_string();
                Ok(Message::InputName { channel, name })
            }
            MessageKind::ActiveInput => {
                let channel = number_at(prefix, line, 2..4)?;
                Ok(Message::ActiveInput(channel))
            }
            MessageKind::SpeakerConfig => {
                let code: u8 = number_at(prefix, line, 3..4)?;
                SpeakerConfig::from_code(code)
                    .map(Message::SpeakerConfig)
                    .ok_or_else(|| {
                        AvrError::decode(prefix, line, format!("speaker code {code} out of range"))
                    })
            }
            MessageKind::DisplayText => decode_display_text(line).map(Message::DisplayText),
        }
    }
}

fn field<'a>(prefix: &'static str, line: &'a str, range: std::ops::Range<usize>) -> Result<&'a str> {
    line.get(range.clone()).ok_or_else(|| {
        AvrError::decode(prefix, line, format!("line too short for bytes {range:?}"))
    })
}

fn number_at<T: std::str::FromStr>(
    prefix: &'static str,
    line: &str,
    range: std::ops::Range<usize>,
) -> Result<T> {
    let digits = field(prefix, line, range)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AvrError::decode(prefix, line, format!("{digits:?} is not a number")));
    }
    digits
        .parse()
        .map_err(|_| AvrError::decode(prefix, line, format!("{digits:?} is out of range")))
}

/// Decode the front panel text of an `FL` line.
///
/// The first four characters are the prefix and a flag byte; the next 28 are
/// 14 hex pairs, one per character. Padding is trimmed.
pub fn decode_display_text(line: &str) -> Result<String> {
    let prefix = MessageKind::DisplayText.prefix();
    let hex = field(prefix, line, 4..4 + MAX_TEXT_LEN * 2)?;
    let mut text = String::with_capacity(MAX_TEXT_LEN);
    for pair in hex.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(pair).unwrap_or_default();
        let code = u8::from_str_radix(pair, 16)
            .map_err(|_| AvrError::decode(prefix, line, format!("{pair:?} is not a hex pair")))?;
        text.push(char::from(code));
    }
    Ok(text.trim().to_string())
}
