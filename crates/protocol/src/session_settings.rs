//! Fixed 60-byte session settings negotiated at join.
//!
//! ```text
//! [0..4]   version (u32)
//! [4..6]   width (u16)
//! [6..8]   height (u16)
//! [8]      color_mode (u8)
//! [9]      render_mode (u8)
//! [10]     palette_type (u8)
//! [11]     custom_palette_len (u8, <= 31)
//! [12..43] custom_palette (31 bytes, zero-padded)
//! [43]     audio_enabled (u8 bool)
//! [44]     encryption_required (u8 bool)
//! [45..60] reserved (15 bytes, must be 0 on write, ignored on read)
//! ```

use serde::{Deserialize, Serialize};

pub const SESSION_SETTINGS_SIZE: usize = 60;
const CUSTOM_PALETTE_CAP: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColorMode {
    Mono = 0,
    Ansi16 = 1,
    Ansi256 = 2,
    TrueColor = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RenderMode {
    Ascii = 0,
    Halfblock = 1,
    Braille = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PaletteType {
    Standard = 0,
    Custom = 1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    pub color_mode: ColorMode,
    pub render_mode: RenderMode,
    pub palette_type: PaletteType,
    pub custom_palette: String,
    pub audio_enabled: bool,
    pub encryption_required: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            version: 1,
            width: 80,
            height: 24,
            color_mode: ColorMode::TrueColor,
            render_mode: RenderMode::Ascii,
            palette_type: PaletteType::Standard,
            custom_palette: String::new(),
            audio_enabled: false,
            encryption_required: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionSettingsError {
    #[error("buffer must be exactly {SESSION_SETTINGS_SIZE} bytes, got {0}")]
    WrongSize(usize),
    #[error("custom palette length {0} exceeds the {CUSTOM_PALETTE_CAP}-byte cap")]
    PaletteTooLong(usize),
    #[error("width {0} out of range (must be 1..=1024)")]
    WidthOutOfRange(u16),
    #[error("height {0} out of range (must be 1..=1024)")]
    HeightOutOfRange(u16),
    #[error("unknown color_mode byte {0}")]
    UnknownColorMode(u8),
    #[error("unknown render_mode byte {0}")]
    UnknownRenderMode(u8),
    #[error("unknown palette_type byte {0}")]
    UnknownPaletteType(u8),
    #[error("custom palette is not valid UTF-8")]
    InvalidPaletteUtf8,
}

impl SessionSettings {
    pub fn encode(&self) -> Result<[u8; SESSION_SETTINGS_SIZE], SessionSettingsError> {
        let palette_bytes = self.custom_palette.as_bytes();
        if palette_bytes.len() > CUSTOM_PALETTE_CAP {
            return Err(SessionSettingsError::PaletteTooLong(palette_bytes.len()));
        }
        if self.width == 0 || self.width > 1024 {
            return Err(SessionSettingsError::WidthOutOfRange(self.width));
        }
        if self.height == 0 || self.height > 1024 {
            return Err(SessionSettingsError::HeightOutOfRange(self.height));
        }

        let mut buf = [0u8; SESSION_SETTINGS_SIZE];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..6].copy_from_slice(&self.width.to_be_bytes());
        buf[6..8].copy_from_slice(&self.height.to_be_bytes());
        buf[8] = self.color_mode as u8;
        buf[9] = self.render_mode as u8;
        buf[10] = self.palette_type as u8;
        buf[11] = palette_bytes.len() as u8;
        buf[12..12 + palette_bytes.len()].copy_from_slice(palette_bytes);
        buf[43] = self.audio_enabled as u8;
        buf[44] = self.encryption_required as u8;
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, SessionSettingsError> {
        if buf.len() != SESSION_SETTINGS_SIZE {
            return Err(SessionSettingsError::WrongSize(buf.len()));
        }

        let version = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let width = u16::from_be_bytes([buf[4], buf[5]]);
        let height = u16::from_be_bytes([buf[6], buf[7]]);
        if width == 0 || width > 1024 {
            return Err(SessionSettingsError::WidthOutOfRange(width));
        }
        if height == 0 || height > 1024 {
            return Err(SessionSettingsError::HeightOutOfRange(height));
        }
        let color_mode = match buf[8] {
            0 => ColorMode::Mono,
            1 => ColorMode::Ansi16,
            2 => ColorMode::Ansi256,
            3 => ColorMode::TrueColor,
            other => return Err(SessionSettingsError::UnknownColorMode(other)),
        };
        let render_mode = match buf[9] {
            0 => RenderMode::Ascii,
            1 => RenderMode::Halfblock,
            2 => RenderMode::Braille,
            other => return Err(SessionSettingsError::UnknownRenderMode(other)),
        };
        let palette_type = match buf[10] {
            0 => PaletteType::Standard,
            1 => PaletteType::Custom,
            other => return Err(SessionSettingsError::UnknownPaletteType(other)),
        };
        let palette_len = buf[11] as usize;
        if palette_len > CUSTOM_PALETTE_CAP {
            return Err(SessionSettingsError::PaletteTooLong(palette_len));
        }
        let custom_palette = std::str::from_utf8(&buf[12..12 + palette_len])
            .map_err(|_| SessionSettingsError::InvalidPaletteUtf8)?
            .to_string();

        Ok(Self {
            version,
            width,
            height,
            color_mode,
            render_mode,
            palette_type,
            custom_palette,
            audio_enabled: buf[43] != 0,
            encryption_required: buf[44] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roundtrips() {
        let settings = SessionSettings::default();
        let bytes = settings.encode().unwrap();
        assert_eq!(bytes.len(), SESSION_SETTINGS_SIZE);
        let back = SessionSettings::decode(&bytes).unwrap();
        assert_eq!(settings, back);
    }

    #[test]
    fn custom_palette_roundtrips() {
        let mut settings = SessionSettings::default();
        settings.palette_type = PaletteType::Custom;
        settings.custom_palette = " .:-=+*#%@".to_string();
        let bytes = settings.encode().unwrap();
        let back = SessionSettings::decode(&bytes).unwrap();
        assert_eq!(settings.custom_palette, back.custom_palette);
    }

    #[test]
    fn oversize_palette_rejected() {
        let mut settings = SessionSettings::default();
        settings.custom_palette = "x".repeat(CUSTOM_PALETTE_CAP + 1);
        match settings.encode() {
            Err(SessionSettingsError::PaletteTooLong(_)) => {}
            other => panic!("expected PaletteTooLong, got {other:?}"),
        }
    }

    #[test]
    fn wrong_size_buffer_rejected() {
        let buf = [0u8; 40];
        match SessionSettings::decode(&buf) {
            Err(SessionSettingsError::WrongSize(40)) => {}
            other => panic!("expected WrongSize(40), got {other:?}"),
        }
    }

    #[test]
    fn zero_width_rejected() {
        let mut settings = SessionSettings::default();
        settings.width = 0;
        match settings.encode() {
            Err(SessionSettingsError::WidthOutOfRange(0)) => {}
            other => panic!("expected WidthOutOfRange(0), got {other:?}"),
        }
    }

    #[test]
    fn oversize_height_rejected() {
        let mut settings = SessionSettings::default();
        settings.height = 1025;
        match settings.encode() {
            Err(SessionSettingsError::HeightOutOfRange(1025)) => {}
            other => panic!("expected HeightOutOfRange(1025), got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_out_of_range_dimensions() {
        let mut buf = [0u8; SESSION_SETTINGS_SIZE];
        buf[4..6].copy_from_slice(&0u16.to_be_bytes());
        buf[6..8].copy_from_slice(&24u16.to_be_bytes());
        match SessionSettings::decode(&buf) {
            Err(SessionSettingsError::WidthOutOfRange(0)) => {}
            other => panic!("expected WidthOutOfRange(0), got {other:?}"),
        }
    }

    #[test]
    fn reserved_tail_is_zero_on_encode() {
        let settings = SessionSettings::default();
        let bytes = settings.encode().unwrap();
        assert!(bytes[45..60].iter().all(|&b| b == 0));
    }
}
