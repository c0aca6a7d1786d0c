//! Raw sample conversion
//!
//! Turns the backend's wire bytes into normalized complex floats. The scale
//! is fixed and symmetric: every integer sample is divided by the magnitude
//! of its most negative representable value, so full-scale negative maps to
//! exactly -1.0 and full-scale positive to just under +1.0.

use iq_device::{SampleEncoding, SampleFormat};
use iq_stream::SampleBlock;
use num_complex::Complex;

/// Decode raw wire bytes into `block`, replacing its previous contents.
///
/// Trailing bytes smaller than one IQ pair are ignored.
pub fn convert_block(raw: &[u8], format: SampleFormat, block: &mut SampleBlock) {
    block.clear();
    let sample_bytes = format.encoding.bytes_per_sample();
    let pair_bytes = format.bytes_per_pair();
    if pair_bytes == 0 {
        return;
    }
    let scale = 1.0 / format.encoding.full_scale();
    for pair in raw.chunks_exact(pair_bytes) {
        let re = decode_sample(&pair[..sample_bytes], format.encoding) * scale;
        let im = decode_sample(&pair[sample_bytes..2 * sample_bytes], format.encoding) * scale;
        block.samples.push(Complex::new(re, im));
    }
}

fn decode_sample(bytes: &[u8], encoding: SampleEncoding) -> f32 {
    match encoding {
        SampleEncoding::Int16 => f32::from(i16::from_le_bytes([bytes[0], bytes[1]])),
        SampleEncoding::Int32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
        }
        SampleEncoding::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}
