//! Sparse rune-to-byte correction table.
//!
//! The builder samples the byte offset of every `RUNE_OFFSET_FREQUENCY`th
//! rune. Most text is ASCII, so instead of keeping every sample we only keep
//! the samples where `byte - rune` changes; a lookup interpolates from the
//! closest preceding correction.

/// Rune stride at which byte offsets are sampled.
pub const RUNE_OFFSET_FREQUENCY: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuneOffsetCorrection {
    pub rune_offset: u32,
    pub byte_offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuneOffsetMap(Vec<RuneOffsetCorrection>);

impl RuneOffsetMap {
    /// Build from sampled byte offsets: `samples[i]` is the byte offset of
    /// rune `i * RUNE_OFFSET_FREQUENCY`.
    pub fn from_samples(samples: &[u32]) -> Self {
        let mut out = Vec::new();
        let mut last_delta = 0u32;
        for (i, &byte_offset) in samples.iter().enumerate() {
            let rune_offset = i as u32 * RUNE_OFFSET_FREQUENCY;
            let delta = byte_offset.wrapping_sub(rune_offset);
            if delta != last_delta {
                out.push(RuneOffsetCorrection {
                    rune_offset,
                    byte_offset,
                });
                last_delta = delta;
            }
        }
        RuneOffsetMap(out)
    }

    pub fn from_corrections(c: Vec<RuneOffsetCorrection>) -> Self {
        RuneOffsetMap(c)
    }

    /// Returns the byte offset of the nearest sampled rune at or below
    /// `rune_offset`, and how many runes remain to be scanned from there.
    pub fn lookup(&self, rune_offset: u32) -> (u32, u32) {
        let slot = self.0.partition_point(|c| c.rune_offset <= rune_offset);
        let left = rune_offset % RUNE_OFFSET_FREQUENCY;
        let rounded = rune_offset - left;
        if slot == 0 {
            return (rounded, left);
        }
        let c = self.0[slot - 1];
        (c.byte_offset + (rounded - c.rune_offset), left)
    }

    pub fn size_bytes(&self) -> usize {
        8 * self.0.len()
    }

    pub fn corrections(&self) -> &[RuneOffsetCorrection] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corr(pairs: &[(u32, u32)]) -> RuneOffsetMap {
        RuneOffsetMap::from_corrections(
            pairs
                .iter()
                .map(|&(r, b)| RuneOffsetCorrection {
                    rune_offset: r,
                    byte_offset: b,
                })
                .collect(),
        )
    }

    #[test]
    fn condense_keeps_only_changes() {
        assert_eq!(RuneOffsetMap::from_samples(&[]), corr(&[]));
        assert_eq!(
            RuneOffsetMap::from_samples(&[0, 100, 200, 300, 400, 500]),
            corr(&[])
        );
        let samples = [0, 105, 205, 310, 420];
        let m = RuneOffsetMap::from_samples(&samples);
        assert_eq!(m, corr(&[(100, 105), (300, 310), (400, 420)]));
        for (j, &want) in samples.iter().enumerate() {
            assert_eq!(m.lookup(j as u32 * RUNE_OFFSET_FREQUENCY).0, want);
        }
    }

    #[test]
    fn lookup_returns_base_and_leftover() {
        assert_eq!(corr(&[]).lookup(0), (0, 0));
        assert_eq!(corr(&[]).lookup(1234), (1200, 34));
        let m = corr(&[(100, 105), (400, 430)]);
        assert_eq!(m.lookup(5), (0, 5));
        assert_eq!(m.lookup(120), (105, 20));
        assert_eq!(m.lookup(1234), (1230, 34));
    }

    #[test]
    fn lookup_between_corrections() {
        let m = corr(&[(100, 105), (200, 210), (400, 430)]);
        let inputs = [0, 1, 99, 100, 101, 199, 200, 201, 300, 399, 400, 401, 510, 610];
        let wanted = [0, 0, 0, 105, 105, 105, 210, 210, 310, 310, 430, 430, 530, 630];
        for (i, &v) in inputs.iter().enumerate() {
            assert_eq!(m.lookup(v).0, wanted[i], "lookup({})", v);
        }
    }
}
