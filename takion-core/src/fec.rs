//! Systematic erasure coding for media frames.
//!
//! A frame is `source` data units followed by `parity` redundancy units,
//! all exactly `block_size` bytes. Any `source` surviving units are enough
//! to rebuild the frame.
//!
//! ## Construction
//!
//! ```text
//!   ┌ I_k ┐   source rows: identity (units are sent verbatim)
//!   └ C   ┘   parity rows: Cauchy matrix C[j][i] = 1 / (x_j ⊕ y_i)
//!             x_j = k + j, y_i = i, arithmetic in GF(2^8) / 0x11D
//! ```
//!
//! Every k×k submatrix of a Cauchy-extended identity is invertible, so
//! decoding reduces to inverting the rows of the surviving units.
//! The codec is stateless; independent frames may be coded concurrently.

use crate::error::FecFailure;

/// Largest frame the field can address (`k + m` distinct evaluation points).
pub const MAX_UNITS: usize = 256;

// ── GF(2^8) arithmetic ───────────────────────────────────────────

const POLY: u16 = 0x11D;

const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= POLY;
        }
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    (exp, log)
}

const TABLES: ([u8; 512], [u8; 256]) = build_tables();
const EXP: [u8; 512] = TABLES.0;
const LOG: [u8; 256] = TABLES.1;

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0);
    EXP[255 - LOG[a as usize] as usize]
}

/// `dst ^= coef * src`, byte-wise.
fn mul_add(dst: &mut [u8], src: &[u8], coef: u8) {
    match coef {
        0 => {}
        1 => dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s),
        _ => {
            let log_c = LOG[coef as usize] as usize;
            for (d, &s) in dst.iter_mut().zip(src) {
                if s != 0 {
                    *d ^= EXP[log_c + LOG[s as usize] as usize];
                }
            }
        }
    }
}

fn cauchy(source_count: usize, parity_row: usize, source_col: usize) -> u8 {
    let x = (source_count + parity_row) as u8;
    let y = source_col as u8;
    gf_inv(x ^ y)
}

/// Invert a square matrix in place (Gauss-Jordan).
fn invert(matrix: &mut [Vec<u8>]) -> Result<Vec<Vec<u8>>, FecFailure> {
    let n = matrix.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|r| (0..n).map(|c| u8::from(r == c)).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n)
            .find(|&r| matrix[r][col] != 0)
            .ok_or(FecFailure::InvalidLayout("singular decode matrix"))?;
        matrix.swap(col, pivot);
        inv.swap(col, pivot);

        let scale = gf_inv(matrix[col][col]);
        for c in 0..n {
            matrix[col][c] = gf_mul(matrix[col][c], scale);
            inv[col][c] = gf_mul(inv[col][c], scale);
        }

        for r in 0..n {
            if r == col || matrix[r][col] == 0 {
                continue;
            }
            let factor = matrix[r][col];
            let (pivot_row, pivot_inv) = (matrix[col].clone(), inv[col].clone());
            mul_add(&mut matrix[r], &pivot_row, factor);
            mul_add(&mut inv[r], &pivot_inv, factor);
        }
    }
    Ok(inv)
}

fn check_layout(source_count: usize, parity_count: usize) -> Result<(), FecFailure> {
    if source_count == 0 {
        return Err(FecFailure::InvalidLayout("frame needs at least one source unit"));
    }
    if source_count + parity_count > MAX_UNITS {
        return Err(FecFailure::InvalidLayout("more than 256 units in frame"));
    }
    Ok(())
}

// ── FecCodec ─────────────────────────────────────────────────────

/// Erasure codec for one block size.
///
/// Audio uses a fixed small block size; video builds a codec per frame
/// from the size of its units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecCodec {
    block_size: usize,
}

impl FecCodec {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Compute `parity_count` parity units from `units` (which must hold
    /// exactly `source_count` source units) and append them.
    pub fn encode(
        &self,
        units: &mut Vec<Vec<u8>>,
        source_count: usize,
        parity_count: usize,
    ) -> Result<(), FecFailure> {
        check_layout(source_count, parity_count)?;
        if units.len() != source_count {
            return Err(FecFailure::InvalidLayout("unit count differs from source count"));
        }
        self.check_sizes(units.iter().map(Vec::len).enumerate())?;

        for j in 0..parity_count {
            let mut parity = vec![0u8; self.block_size];
            for (i, unit) in units[..source_count].iter().enumerate() {
                mul_add(&mut parity, unit, cauchy(source_count, j, i));
            }
            units.push(parity);
        }
        Ok(())
    }

    /// Encode a contiguous frame buffer: the first `source_count` blocks are
    /// source data, the trailing `parity_count` blocks are overwritten with
    /// parity.
    pub fn encode_frame(
        &self,
        frame: &mut [u8],
        source_count: usize,
        parity_count: usize,
    ) -> Result<(), FecFailure> {
        check_layout(source_count, parity_count)?;
        let expected = (source_count + parity_count) * self.block_size;
        if frame.len() != expected {
            return Err(FecFailure::UnitSizeMismatch {
                index: 0,
                expected,
                actual: frame.len(),
            });
        }

        let (sources, parities) = frame.split_at_mut(source_count * self.block_size);
        for (j, parity) in parities.chunks_exact_mut(self.block_size).enumerate() {
            parity.fill(0);
            for (i, unit) in sources.chunks_exact(self.block_size).enumerate() {
                mul_add(parity, unit, cauchy(source_count, j, i));
            }
        }
        Ok(())
    }

    /// Rebuild the source units of a frame.
    ///
    /// `units` holds `source_count + parity_count` slots, `None` marking a
    /// lost unit. Recovered source units are written back into their slots
    /// and the full source sequence is returned. Surviving source units are
    /// returned verbatim.
    pub fn decode(
        &self,
        units: &mut [Option<Vec<u8>>],
        source_count: usize,
        parity_count: usize,
    ) -> Result<Vec<Vec<u8>>, FecFailure> {
        check_layout(source_count, parity_count)?;
        if units.len() != source_count + parity_count {
            return Err(FecFailure::InvalidLayout("slot count differs from frame size"));
        }
        self.check_sizes(
            units
                .iter()
                .enumerate()
                .filter_map(|(i, u)| u.as_ref().map(|u| (i, u.len()))),
        )?;

        let missing = units.iter().filter(|u| u.is_none()).count();
        if missing > parity_count {
            return Err(FecFailure::TooManyMissing {
                missing,
                parity: parity_count,
            });
        }

        let lost_sources: Vec<usize> = (0..source_count).filter(|&i| units[i].is_none()).collect();
        if !lost_sources.is_empty() {
            self.reconstruct(units, source_count, &lost_sources)?;
        }

        Ok(units[..source_count]
            .iter()
            .flatten()
            .cloned()
            .collect())
    }

    fn reconstruct(
        &self,
        units: &mut [Option<Vec<u8>>],
        source_count: usize,
        lost_sources: &[usize],
    ) -> Result<(), FecFailure> {
        // First k surviving units; sources first keeps the matrix sparse.
        let survivors: Vec<usize> = (0..units.len())
            .filter(|&i| units[i].is_some())
            .take(source_count)
            .collect();

        let mut matrix: Vec<Vec<u8>> = survivors
            .iter()
            .map(|&row| {
                (0..source_count)
                    .map(|col| {
                        if row < source_count {
                            u8::from(row == col)
                        } else {
                            cauchy(source_count, row - source_count, col)
                        }
                    })
                    .collect()
            })
            .collect();
        let inverse = invert(&mut matrix)?;

        for &lost in lost_sources {
            let mut out = vec![0u8; self.block_size];
            for (r, &row) in survivors.iter().enumerate() {
                if let Some(unit) = &units[row] {
                    mul_add(&mut out, unit, inverse[lost][r]);
                }
            }
            units[lost] = Some(out);
        }
        Ok(())
    }

    fn check_sizes(&self, sizes: impl Iterator<Item = (usize, usize)>) -> Result<(), FecFailure> {
        for (index, actual) in sizes {
            if actual != self.block_size {
                return Err(FecFailure::UnitSizeMismatch {
                    index,
                    expected: self.block_size,
                    actual,
                });
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
