//! GMScreen command codes.
//!
//! Every request carries one of these codes in the `request` attribute of its
//! `<Command>` element.

use crate::error::{Result, StbError};

/// Command code sent in the `request` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandCode {
    /// Paginated channel list (`<FromIndex>`/`<ToIndex>`)
    GetChannels = 0,

    /// Parental lock status
    GetLockStatus = 1,

    /// Remote-control key press (`<KeyVal>`)
    SendKey = 2,

    /// Current device time
    GetTime = 11,

    /// Favorite group names and ids
    GetFavoriteGroups = 12,

    /// Sleep timer settings
    GetSleepSettings = 13,

    /// Product name, software version, serial, channel count
    GetStbInfo = 15,

    /// Session status, sent during the handshake
    Status = 20,

    /// Client identification, first command of the handshake
    Identify = 998,

    /// Change channel (zap)
    ChangeChannel = 1000,

    /// Write a channel's favorite membership
    SetFavorite = 1004,

    /// Session init. Known but never sent: the device shows its
    /// initializing screen in response.
    Init = 1012,
}

impl CommandCode {
    /// Look up a command code from its numeric value.
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::GetChannels),
            1 => Ok(Self::GetLockStatus),
            2 => Ok(Self::SendKey),
            11 => Ok(Self::GetTime),
            12 => Ok(Self::GetFavoriteGroups),
            13 => Ok(Self::GetSleepSettings),
            15 => Ok(Self::GetStbInfo),
            20 => Ok(Self::Status),
            998 => Ok(Self::Identify),
            1000 => Ok(Self::ChangeChannel),
            1004 => Ok(Self::SetFavorite),
            1012 => Ok(Self::Init),
            _ => Err(StbError::invalid_frame(format!("unknown command code {value}"))),
        }
    }

    /// Numeric value on the wire.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Short name used in logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::GetChannels => "GetChannels",
            Self::GetLockStatus => "GetLockStatus",
            Self::SendKey => "SendKey",
            Self::GetTime => "GetTime",
            Self::GetFavoriteGroups => "GetFavoriteGroups",
            Self::GetSleepSettings => "GetSleepSettings",
            Self::GetStbInfo => "GetStbInfo",
            Self::Status => "Status",
            Self::Identify => "Identify",
            Self::ChangeChannel => "ChangeChannel",
            Self::SetFavorite => "SetFavorite",
            Self::Init => "Init",
        }
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_values() {
        assert_eq!(CommandCode::GetChannels.as_u16(), 0);
        assert_eq!(CommandCode::Status.as_u16(), 20);
        assert_eq!(CommandCode::Identify.as_u16(), 998);
        assert_eq!(CommandCode::ChangeChannel.as_u16(), 1000);
        assert_eq!(CommandCode::SetFavorite.as_u16(), 1004);
        assert_eq!(CommandCode::Init.as_u16(), 1012);
    }

    #[test]
    fn test_command_code_from_u16() {
        for code in [
            CommandCode::GetChannels,
            CommandCode::GetTime,
            CommandCode::GetFavoriteGroups,
            CommandCode::GetStbInfo,
            CommandCode::ChangeChannel,
        ] {
            assert_eq!(CommandCode::from_u16(code.as_u16()).unwrap(), code);
        }
        assert!(CommandCode::from_u16(3).is_err());
        assert!(CommandCode::from_u16(999).is_err());
    }

    #[test]
    fn test_command_code_display() {
        assert_eq!(CommandCode::GetStbInfo.to_string(), "GetStbInfo(15)");
    }
}
