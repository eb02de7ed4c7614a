use serde::{Deserialize, Serialize};

/// RGBA colour, channels in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    pub fn from_hex(hex: u32) -> Self {
        let r = ((hex >> 16) & 0xFF) as f32 / 255.0;
        let g = ((hex >> 8) & 0xFF) as f32 / 255.0;
        let b = (hex & 0xFF) as f32 / 255.0;
        Self::rgb(r, g, b)
    }

    pub fn to_hex(&self) -> u32 {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (channel(self.r) << 16) | (channel(self.g) << 8) | channel(self.b)
    }

    pub fn with_alpha(&self, alpha: f32) -> Self {
        Self { a: alpha, ..*self }
    }

    /// CSS colour string accepted by canvas-based chart libraries.
    pub fn to_css(&self) -> String {
        if self.a >= 1.0 {
            format!("#{:06x}", self.to_hex())
        } else {
            let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
            format!(
                "rgba({}, {}, {}, {:.2})",
                channel(self.r),
                channel(self.g),
                channel(self.b),
                self.a
            )
        }
    }
}

impl From<u32> for Color {
    fn from(hex: u32) -> Self {
        Self::from_hex(hex)
    }
}

/// Up/down colours for volume bars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumePalette {
    pub up: Color,
    pub down: Color,
}

impl VolumePalette {
    pub fn new(up: Color, down: Color) -> Self {
        Self { up, down }
    }

    pub fn from_hex(up: u32, down: u32, alpha: f32) -> Self {
        Self::new(Color::from_hex(up).with_alpha(alpha), Color::from_hex(down).with_alpha(alpha))
    }
}

impl Default for VolumePalette {
    fn default() -> Self {
        Self::from_hex(0x26a69a, 0xef5350, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips_and_formats_css() {
        let teal = Color::from_hex(0x26a69a);
        assert_eq!(teal.to_hex(), 0x26a69a);
        assert_eq!(teal.to_css(), "#26a69a");
        assert_eq!(teal.with_alpha(0.5).to_css(), "rgba(38, 166, 154, 0.50)");
    }
}
