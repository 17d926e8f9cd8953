use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Result;

const THUMBNAIL_EDGE: u32 = 64;
/// Minimum euclidean distance (in normalised RGB) between picked accents.
const MIN_ACCENT_DISTANCE: f32 = 0.25;
const BACKGROUND_LEVEL: f32 = 0.12;

/// Linear RGB colour with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_rgb8(rgb: [u8; 3]) -> Self {
        Self::rgb(
            rgb[0] as f32 / 255.0,
            rgb[1] as f32 / 255.0,
            rgb[2] as f32 / 255.0,
        )
    }

    pub fn scaled(self, factor: f32) -> Self {
        Self::rgb(
            (self.r * factor).clamp(0.0, 1.0),
            (self.g * factor).clamp(0.0, 1.0),
            (self.b * factor).clamp(0.0, 1.0),
        )
    }

    /// Linear blend towards `other`; `t = 0` keeps `self`.
    pub fn mix(self, other: Color, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::rgb(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    fn distance(self, other: Color) -> f32 {
        let dr = self.r - other.r;
        let dg = self.g - other.g;
        let db = self.b - other.b;
        (dr * dr + dg * dg + db * db).sqrt()
    }
}

/// Small colour set applied to both active programs and the clear colour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub primary: Color,
    pub secondary: Color,
    pub tertiary: Color,
    pub background: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            primary: Color::rgb(0.95, 0.95, 0.95),
            secondary: Color::rgb(0.2, 0.8, 0.9),
            tertiary: Color::rgb(0.9, 0.3, 0.7),
            background: Color::rgb(0.02, 0.02, 0.04),
        }
    }
}

impl Palette {
    /// Builds a palette from raw RGB pixels using a coarse 4-bit-per-channel
    /// histogram. An empty input yields [`Palette::default`].
    pub fn from_pixels<I>(pixels: I) -> Self
    where
        I: IntoIterator<Item = [u8; 3]>,
    {
        let mut buckets: HashMap<u16, Bucket> = HashMap::new();
        for [r, g, b] in pixels {
            let key = ((r >> 4) as u16) << 8 | ((g >> 4) as u16) << 4 | (b >> 4) as u16;
            buckets.entry(key).or_default().add([r, g, b]);
        }

        let mut ranked: Vec<(u16, Bucket)> = buckets.into_iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| b.count.cmp(&a.count).then(ka.cmp(kb)));

        let Some((_, top)) = ranked.first() else {
            return Self::default();
        };
        let primary = top.mean();

        let mut accents: Vec<Color> = Vec::with_capacity(2);
        for (_, bucket) in ranked.iter().skip(1) {
            let candidate = bucket.mean();
            let distinct = std::iter::once(primary)
                .chain(accents.iter().copied())
                .all(|picked| picked.distance(candidate) >= MIN_ACCENT_DISTANCE);
            if distinct {
                accents.push(candidate);
                if accents.len() == 2 {
                    break;
                }
            }
        }

        let secondary = accents
            .first()
            .copied()
            .unwrap_or_else(|| primary.mix(Color::WHITE, 0.45));
        let tertiary = accents
            .get(1)
            .copied()
            .unwrap_or_else(|| secondary.mix(Color::BLACK, 0.45));

        Self {
            primary,
            secondary,
            tertiary,
            background: primary.scaled(BACKGROUND_LEVEL),
        }
    }

    /// Decodes encoded artwork (PNG or JPEG) and extracts a palette from a
    /// thumbnail of it.
    pub fn from_image_bytes(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        let thumbnail = image.thumbnail(THUMBNAIL_EDGE, THUMBNAIL_EDGE).to_rgb8();
        Ok(Self::from_pixels(thumbnail.pixels().map(|pixel| pixel.0)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    count: u32,
    sum: [u32; 3],
}

impl Bucket {
    fn add(&mut self, rgb: [u8; 3]) {
        self.count += 1;
        for (sum, value) in self.sum.iter_mut().zip(rgb) {
            *sum += value as u32;
        }
    }

    fn mean(&self) -> Color {
        let count = self.count.max(1);
        Color::from_rgb8([
            (self.sum[0] / count) as u8,
            (self.sum[1] / count) as u8,
            (self.sum[2] / count) as u8,
        ])
    }
}
