//! TIFF and PNG predictors, applied before compression and reversed after
//! decompression to improve compressibility of tabular or image data.

use crate::error::{Error, Result};
use itertools::izip;

const NAME: &str = "Predictor";

/// The prediction parameters shared by the Flate and LZW filters.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PredictorParams {
    pub predictor: u8,
    pub colors: u8,
    pub bits_per_component: u8,
    pub columns: usize,
    pub early_change: bool,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            colors: 1,
            bits_per_component: 8,
            columns: 1,
            early_change: true,
        }
    }
}

impl PredictorParams {
    fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_component as usize * self.colors as usize + 7) / 8
    }

    fn row_length_in_bytes(&self) -> usize {
        (self.columns * self.colors as usize * self.bits_per_component as usize + 7) / 8
    }

    fn is_identity(&self) -> bool {
        self.predictor <= 1
    }
}

/// Reverse the predictor after decompression.
pub(crate) fn reverse(data: Vec<u8>, params: &PredictorParams) -> Result<Vec<u8>> {
    if params.is_identity() {
        return Ok(data);
    }

    match params.predictor {
        2 => reverse_tiff(data, params),
        10..=15 => reverse_png(data, params),
        p => Err(Error::decode(NAME, format!("unknown predictor {p}"))),
    }
}

/// Apply the predictor before compression.
pub(crate) fn apply(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    if params.is_identity() {
        return Ok(data.to_vec());
    }

    match params.predictor {
        2 => apply_tiff(data, params),
        10..=15 => Ok(apply_png(data, params)),
        p => Err(Error::decode(NAME, format!("unknown predictor {p}"))),
    }
}

fn check_tiff(params: &PredictorParams) -> Result<()> {
    if params.bits_per_component != 8 {
        return Err(Error::Unsupported(format!(
            "TIFF predictor with {} bits per component",
            params.bits_per_component
        )));
    }

    Ok(())
}

fn reverse_tiff(mut data: Vec<u8>, params: &PredictorParams) -> Result<Vec<u8>> {
    check_tiff(params)?;

    let row_len = params.row_length_in_bytes();
    let colors = params.colors as usize;

    for row in data.chunks_exact_mut(row_len) {
        for i in colors..row.len() {
            row[i] = row[i].wrapping_add(row[i - colors]);
        }
    }

    Ok(data)
}

fn apply_tiff(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    check_tiff(params)?;

    let row_len = params.row_length_in_bytes();
    let colors = params.colors as usize;
    let mut out = data.to_vec();

    for (out_row, in_row) in out.chunks_exact_mut(row_len).zip(data.chunks_exact(row_len)) {
        for i in (colors..out_row.len()).rev() {
            out_row[i] = in_row[i].wrapping_sub(in_row[i - colors]);
        }
    }

    Ok(out)
}

fn reverse_png(data: Vec<u8>, params: &PredictorParams) -> Result<Vec<u8>> {
    let row_len = params.row_length_in_bytes();
    // Each row starts with the selector byte of the predictor in use.
    let total_row_len = row_len + 1;

    let num_rows = data.len() / total_row_len;
    if num_rows * total_row_len != data.len() {
        return Err(Error::decode(NAME, "data is not a whole number of rows"));
    }

    let bpp = params.bytes_per_pixel();
    let zero_row = vec![0u8; row_len];
    let mut prev_row: &[u8] = &zero_row;

    let mut out = vec![0u8; num_rows * row_len];

    for (in_row, out_row) in data
        .chunks_exact(total_row_len)
        .zip(out.chunks_exact_mut(row_len))
    {
        let selector = in_row[0];
        let in_data = &in_row[1..];

        match selector {
            0 => out_row.copy_from_slice(in_data),
            1 => unfilter::<Sub>(prev_row, in_data, out_row, bpp),
            2 => unfilter::<Up>(prev_row, in_data, out_row, bpp),
            3 => unfilter::<Avg>(prev_row, in_data, out_row, bpp),
            4 => unfilter::<Paeth>(prev_row, in_data, out_row, bpp),
            s => {
                return Err(Error::decode(NAME, format!("invalid row selector {s}")));
            }
        }

        prev_row = out_row;
    }

    Ok(out)
}

fn apply_png(data: &[u8], params: &PredictorParams) -> Vec<u8> {
    let row_len = params.row_length_in_bytes();
    let bpp = params.bytes_per_pixel();

    let zero_row = vec![0u8; row_len];
    let mut prev_row: &[u8] = &zero_row;

    let mut out = Vec::with_capacity(data.len() + data.len() / row_len.max(1) + 1);
    let mut filtered = vec![0u8; row_len];

    for row in data.chunks(row_len) {
        // Short final rows only appear in malformed input, but predicting
        // them row-local keeps the transform total.
        let prev = &prev_row[..row.len()];

        let selector = match params.predictor {
            // Optimum: pick the selector with the smallest absolute sum.
            15 => {
                let mut best = 0u8;
                let mut best_score = u64::MAX;

                for candidate in 0..=4u8 {
                    filter_row(candidate, prev, row, &mut filtered[..row.len()], bpp);
                    let score: u64 = filtered[..row.len()]
                        .iter()
                        .map(|b| (*b as i8).unsigned_abs() as u64)
                        .sum();

                    if score < best_score {
                        best_score = score;
                        best = candidate;
                    }
                }

                best
            }
            p => p - 10,
        };

        filter_row(selector, prev, row, &mut filtered[..row.len()], bpp);

        out.push(selector);
        out.extend_from_slice(&filtered[..row.len()]);
        prev_row = row;
    }

    out
}

fn filter_row(selector: u8, prev: &[u8], cur: &[u8], out: &mut [u8], bpp: usize) {
    match selector {
        0 => out.copy_from_slice(cur),
        1 => filter::<Sub>(prev, cur, out, bpp),
        2 => filter::<Up>(prev, cur, out, bpp),
        3 => filter::<Avg>(prev, cur, out, bpp),
        4 => filter::<Paeth>(prev, cur, out, bpp),
        _ => unreachable!(),
    }
}

trait Predictor {
    fn predict(prev_row: u8, prev_col: u8, top_left: u8) -> u8;
}

fn unfilter<T: Predictor>(prev_row: &[u8], cur: &[u8], out: &mut [u8], bpp: usize) {
    for (i, (cur, up)) in izip!(cur, prev_row).enumerate() {
        let left = if i >= bpp { out[i - bpp] } else { 0 };
        let top_left = if i >= bpp { prev_row[i - bpp] } else { 0 };

        out[i] = cur.wrapping_add(T::predict(*up, left, top_left));
    }
}

fn filter<T: Predictor>(prev_row: &[u8], cur: &[u8], out: &mut [u8], bpp: usize) {
    for (i, (byte, up)) in izip!(cur, prev_row).enumerate() {
        let left = if i >= bpp { cur[i - bpp] } else { 0 };
        let top_left = if i >= bpp { prev_row[i - bpp] } else { 0 };

        out[i] = byte.wrapping_sub(T::predict(*up, left, top_left));
    }
}

struct Sub;
impl Predictor for Sub {
    fn predict(_: u8, prev_col: u8, _: u8) -> u8 {
        prev_col
    }
}

struct Up;
impl Predictor for Up {
    fn predict(prev_row: u8, _: u8, _: u8) -> u8 {
        prev_row
    }
}

struct Avg;
impl Predictor for Avg {
    fn predict(prev_row: u8, prev_col: u8, _: u8) -> u8 {
        ((prev_col as u16 + prev_row as u16) / 2) as u8
    }
}

struct Paeth;
impl Predictor for Paeth {
    fn predict(prev_row: u8, prev_col: u8, top_left: u8) -> u8 {
        let a = prev_col as i16;
        let b = prev_row as i16;
        let c = top_left as i16;

        let p = a + b - c;
        let pa = (p - a).abs();
        let pb = (p - b).abs();
        let pc = (p - c).abs();

        if pa <= pb && pa <= pc {
            a as u8
        } else if pb <= pc {
            b as u8
        } else {
            c as u8
        }
    }
}
