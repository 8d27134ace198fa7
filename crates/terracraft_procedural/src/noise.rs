//! # Simplex Noise
//!
//! Deterministic 2D simplex noise plus the seed type every generator
//! derives its streams from.
//!
//! ## Determinism Guarantee
//!
//! Given the same `WorldSeed`, every function in this module produces
//! **exactly** the same values on any platform, in any call order. Nothing
//! here caches state between samples.

use crate::chunk::ChunkCoord;

/// World seed for deterministic generation.
///
/// All procedural generation derives from this seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorldSeed(u64);

impl WorldSeed {
    /// Creates a new world seed.
    #[inline]
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Returns the raw seed value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Derives an independent sub-seed for one purpose (biome, detail, ores...).
    #[inline]
    #[must_use]
    pub const fn derive(self, purpose: u64) -> Self {
        Self(splitmix64(self.0 ^ splitmix64(purpose)))
    }

    /// Derives the seed of one chunk's private random stream.
    ///
    /// Depends only on the world seed, the chunk coordinate and the salt,
    /// never on which chunks were generated before.
    #[inline]
    #[must_use]
    pub const fn for_chunk(self, coord: ChunkCoord, salt: u64) -> u64 {
        let packed = ((coord.x as u32 as u64) << 32) | (coord.z as u32 as u64);
        splitmix64(self.derive(salt).0 ^ splitmix64(packed))
    }
}

impl Default for WorldSeed {
    fn default() -> Self {
        Self(0x7E44_AC4A_F7C0_FFEE)
    }
}

/// SplitMix64 finalizer. Never maps a non-zero stream to a stuck state.
#[inline]
const fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Gradient directions for 2D simplex (12 gradients, 8 unique).
const GRADIENTS: [[i8; 2]; 12] = [
    [1, 0], [1, 1], [0, 1], [-1, 1],
    [-1, 0], [-1, -1], [0, -1], [1, -1],
    [1, 0], [0, 1], [-1, 0], [0, -1],
];

/// 2D Simplex noise generator.
///
/// Produces smooth, continuous values in the range [-1, 1]. O(1) per
/// sample with no allocations.
pub struct SimplexNoise {
    /// 256-entry permutation doubled to 512 to avoid index wrapping.
    perm: [u8; 512],
}

impl SimplexNoise {
    /// Skewing factor for 2D simplex grid: (sqrt(3) - 1) / 2
    const F2: f64 = 0.366_025_403_784_438_6;
    /// Unskewing factor for 2D simplex grid: (3 - sqrt(3)) / 6
    const G2: f64 = 0.211_324_865_405_187_1;

    /// Creates a new simplex noise generator from a seed.
    #[must_use]
    pub fn new(seed: WorldSeed) -> Self {
        let mut perm = [0u8; 512];
        for (i, slot) in perm.iter_mut().take(256).enumerate() {
            *slot = i as u8;
        }

        // Fisher-Yates driven by splitmix so a zero seed still shuffles
        let mut state = seed.value();
        for i in (1..256).rev() {
            state = splitmix64(state);
            let j = (state % (i as u64 + 1)) as usize;
            perm.swap(i, j);
        }

        for i in 0..256 {
            perm[256 + i] = perm[i];
        }

        Self { perm }
    }

    #[inline]
    fn hash(&self, index: usize) -> u8 {
        self.perm[index & 511]
    }

    /// Samples 2D simplex noise at the given coordinates.
    ///
    /// # Returns
    ///
    /// A value in the range [-1, 1].
    #[must_use]
    pub fn sample(&self, x: f64, y: f64) -> f64 {
        let skew = (x + y) * Self::F2;
        let i = (x + skew).floor() as i64;
        let j = (y + skew).floor() as i64;

        let unskew = (i + j) as f64 * Self::G2;
        let x0 = x - (i as f64 - unskew);
        let y0 = y - (j as f64 - unskew);

        // Upper or lower triangle of the skewed cell
        let (i1, j1) = if x0 > y0 { (1, 0) } else { (0, 1) };

        let x1 = x0 - f64::from(i1) + Self::G2;
        let y1 = y0 - f64::from(j1) + Self::G2;
        let x2 = x0 - 1.0 + 2.0 * Self::G2;
        let y2 = y0 - 1.0 + 2.0 * Self::G2;

        let ii = (i & 255) as usize;
        let jj = (j & 255) as usize;

        let g0 = self.hash(ii + self.hash(jj) as usize);
        let g1 = self.hash(ii + i1 as usize + self.hash(jj + j1 as usize) as usize);
        let g2 = self.hash(ii + 1 + self.hash(jj + 1) as usize);

        let n = corner(x0, y0, g0) + corner(x1, y1, g1) + corner(x2, y2, g2);

        // 70 normalizes the summed contributions to [-1, 1]
        (70.0 * n).clamp(-1.0, 1.0)
    }

    /// Fractal Brownian motion: several octaves of noise summed.
    ///
    /// * `octaves` - Number of layers (typically 3-6)
    /// * `persistence` - Amplitude decay per octave (typically 0.5)
    /// * `lacunarity` - Frequency increase per octave (typically 2.0)
    ///
    /// Normalized back to [-1, 1].
    #[must_use]
    pub fn octaved(&self, x: f64, y: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut max_amplitude = 0.0;

        for _ in 0..octaves {
            total += self.sample(x * frequency, y * frequency) * amplitude;
            max_amplitude += amplitude;
            amplitude *= persistence;
            frequency *= lacunarity;
        }

        if max_amplitude == 0.0 {
            0.0
        } else {
            total / max_amplitude
        }
    }

    /// Ridged noise for mountain chains, in [0, 1].
    #[must_use]
    pub fn ridged(&self, x: f64, y: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut frequency = 1.0;
        let mut max_amplitude = 0.0;

        for _ in 0..octaves {
            let ridge = 1.0 - self.sample(x * frequency, y * frequency).abs();
            total += ridge * ridge * amplitude;
            max_amplitude += amplitude;
            amplitude *= persistence;
            frequency *= lacunarity;
        }

        if max_amplitude == 0.0 {
            0.0
        } else {
            total / max_amplitude
        }
    }
}

/// Contribution of one simplex corner.
#[inline]
fn corner(x: f64, y: f64, hash: u8) -> f64 {
    let t = 0.5 - x * x - y * y;
    if t < 0.0 {
        0.0
    } else {
        let grad = GRADIENTS[(hash % 12) as usize];
        let t2 = t * t;
        t2 * t2 * (x * f64::from(grad[0]) + y * f64::from(grad[1]))
    }
}
