pub const DEFAULT_READ_AHEAD: usize = 1000;
pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_THREADS_PER_GROUP: usize = 256;
pub const CLASS_COUNT: usize = 256;

/// Tunables shared by the readers, the upload stage and the query orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Records decoded per streaming refill.
    pub read_ahead: usize,
    /// Records per resident-buffer transfer.
    pub upload_chunk_size: usize,
    /// Reduction group width; each group spans twice this many candidates.
    pub threads_per_group: usize,
    /// `None` sizes the write buffer from the declared point count.
    pub write_buffer_capacity: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            read_ahead: DEFAULT_READ_AHEAD,
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            threads_per_group: DEFAULT_THREADS_PER_GROUP,
            write_buffer_capacity: None,
        }
    }
}

#[inline]
pub(crate) fn distance(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[inline]
pub(crate) fn rgb8(r: u8, g: u8, b: u8) -> [f32; 3] {
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
}

/// Stable colour for a category index, spread around the hue circle by the golden ratio.
pub(crate) fn palette(index: u32) -> [f32; 3] {
    let hue = (index as f32 * 0.618_034).fract() * 6.0;
    let sector = hue as u32;
    let f = hue - sector as f32;
    let (v, s) = (0.95, 0.65);
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Blue-green-red height bands over `[0, interval]` with a 10 % overlap between bands.
pub(crate) fn height_ramp(h: f32, interval: f32) -> [f32; 3] {
    if interval <= 0.0 {
        return [0.0, 0.0, 1.0];
    }
    let overlap = 0.1;
    let zone = interval * overlap;
    let green_start = interval * 0.1;
    let red_start = interval * 0.5;

    let mut blue = 0.0;
    let blue_high = green_start + zone;
    if h >= 0.0 && h <= blue_high {
        let fade = green_start + zone * 0.1;
        blue = if h < fade {
            1.0
        } else if h < blue_high {
            1.0 - (h - fade) / (blue_high - fade)
        } else {
            0.0
        };
    }

    let mut green = 0.0;
    let green_low = green_start - zone;
    let green_high = red_start + zone;
    if h >= green_low && h <= green_high {
        let rise = green_low + zone * 0.9;
        let fade = red_start + zone * 0.1;
        green = if h <= rise {
            (h - green_low) / (rise - green_low)
        } else if h < fade {
            1.0
        } else if h < green_high {
            1.0 - (h - fade) / (green_high - fade)
        } else {
            0.0
        };
    }

    let mut red = 0.0;
    let red_low = red_start - zone;
    let red_high = interval + zone;
    if h >= red_low && h <= red_high {
        let rise = red_low + zone * 0.9;
        let fade = interval - zone / 2.0;
        red = if h <= rise {
            (h - red_low) / (rise - red_low)
        } else if h < fade {
            1.0
        } else if h < red_high {
            1.0 - (h - fade) / (red_high - fade)
        } else {
            0.0
        };
    }

    [red, green, blue]
}
