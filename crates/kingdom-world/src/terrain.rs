//! Seeded terrain synthesis: string hash, PRNG, coherent noise, and the
//! elevation-to-biome mapping.
//!
//! Everything here is a pure function of the seed string and cell position,
//! so the same seed always produces the same grid on every platform.

use kingdom_types::Biome;

/// Lowest living quality a cell can have.
pub const MIN_LIVING_QUALITY: i32 = -100;

/// Highest living quality a cell can have.
pub const MAX_LIVING_QUALITY: i32 = 100;

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Number of noise octaves summed per cell.
const OCTAVES: u32 = 5;

/// Island radius multiplier: elevation reaches zero at `r = 1 / 1.6`.
const FALLOFF: f64 = 1.6;

/// 32-bit FNV-1a over the UTF-16 code units of `seed`.
pub fn seed_hash(seed: &str) -> u32 {
    seed.encode_utf16().fold(FNV_OFFSET, |h, unit| {
        (h ^ u32::from(unit)).wrapping_mul(FNV_PRIME)
    })
}

/// Small fast counting PRNG (sfc32) with 128 bits of state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sfc32 {
    a: u32,
    b: u32,
    c: u32,
    d: u32,
}

impl Sfc32 {
    /// Expand a 32-bit seed into the four state words.
    pub const fn from_seed(seed: u32) -> Self {
        Self {
            a: seed,
            b: seed ^ 0x9e37_79b9,
            c: seed ^ 0x85eb_ca6b,
            d: seed ^ 0xc2b2_ae35,
        }
    }

    /// Seed from a string via [`seed_hash`].
    pub fn from_str_seed(seed: &str) -> Self {
        Self::from_seed(seed_hash(seed))
    }

    /// Next raw 32-bit output.
    pub const fn next_u32(&mut self) -> u32 {
        let t = self.a.wrapping_add(self.b).wrapping_add(self.d);
        self.d = self.d.wrapping_add(1);
        self.a = self.b ^ self.b.wrapping_shr(9);
        self.b = self.c.wrapping_add(self.c.wrapping_shl(3));
        self.c = self.c.rotate_left(21).wrapping_add(t);
        t
    }

    /// Next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / 4_294_967_296.0
    }
}

/// Hash-style value noise in `[0, 1)`.
pub fn noise2(x: f64, y: f64) -> f64 {
    let n = ((x * 0.061 + 13.37) * (y * 0.053 + 7.17)).sin() * 43_758.545_3;
    n - n.floor()
}

/// Five-octave fractal sum of [`noise2`]: amplitude starts at 0.5 and
/// halves, frequency starts at 0.01 and doubles.
pub fn fbm(x: f64, y: f64) -> f64 {
    let mut value = 0.0;
    let mut amplitude = 0.5;
    let mut frequency = 0.01;
    for _ in 0..OCTAVES {
        value += amplitude * noise2(x * frequency, y * frequency);
        amplitude *= 0.5;
        frequency *= 2.0;
    }
    value
}

/// Elevation of a cell: fractal noise scaled by a radial island falloff
/// centred on the grid.
pub fn elevation(x: u32, y: u32, width: u32, height: u32) -> f64 {
    let (w, h) = (f64::from(width), f64::from(height));
    let cx = (w - 1.0) / 2.0;
    let cy = (h - 1.0) / 2.0;
    let dx = (f64::from(x) - cx) / w;
    let dy = (f64::from(y) - cy) / h;
    let r = dx.hypot(dy);
    let island = (1.0 - r * FALLOFF).max(0.0);
    fbm(f64::from(x), f64::from(y)) * island
}

/// Map elevation to a biome. Draws from `rng` only in the bands that split
/// between two biomes.
pub fn classify(elevation: f64, rng: &mut Sfc32) -> Biome {
    if elevation <= 0.03 {
        Biome::Ocean
    } else if elevation <= 0.08 {
        Biome::Coast
    } else if elevation <= 0.35 {
        if rng.next_f64() < 0.55 {
            Biome::Plains
        } else {
            Biome::Forest
        }
    } else if elevation <= 0.6 {
        if rng.next_f64() < 0.6 {
            Biome::Forest
        } else {
            Biome::Hills
        }
    } else {
        Biome::Mountain
    }
}

/// Living quality: `elevation * 100 - 20` plus jitter in `-5..=4`, rounded
/// half-up and clamped to [`MIN_LIVING_QUALITY`]`..=`[`MAX_LIVING_QUALITY`].
// Clamped to a small integral range before the cast, so it is exact.
#[allow(clippy::cast_possible_truncation)]
pub fn living_quality(elevation: f64, rng: &mut Sfc32) -> i32 {
    let jitter = (rng.next_f64() * 10.0).floor() - 5.0;
    let raw = (elevation * 100.0 - 20.0 + jitter + 0.5).floor();
    raw.clamp(
        f64::from(MIN_LIVING_QUALITY),
        f64::from(MAX_LIVING_QUALITY),
    ) as i32
}
