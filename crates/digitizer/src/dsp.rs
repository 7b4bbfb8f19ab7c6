//! Pure sample conditioning: calibration, the 2-pole equalization filter
//! and bit-width packing. No I/O; coefficient ranges are validated at
//! configuration time, so nothing here can fail mid-stream.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use stream_types::{
    calib::{FILTER_COEFF_Q24, FILTER_COEFF_Q25},
    CalibrationParams, FilterCoefficients, Resolution,
};

/// Apply offset/gain correction to one raw count:
/// `calibrated = raw * gain + offset`.
pub fn calibrate(raw: i32, params: &CalibrationParams) -> i32 {
    (raw as f64 * params.gain as f64).round() as i32 + params.offset
}

/// Streaming form of the front-end equalization filter: two cascaded
/// first-order sections (zero `bb`/pole `aa`, then gain `kk`/pole `pp`).
///
/// State is carried across `apply` calls within a session and reset at
/// session start. With `bypass` set the filter is the identity.
#[derive(Debug, Clone)]
pub struct EqFilter {
    bypass: bool,
    aa: f64,
    bb: f64,
    kk: f64,
    pp: f64,
    // Previous input/output pair of each section.
    x1: f64,
    s1: f64,
    y1: f64,
}

impl EqFilter {
    pub fn new(coeffs: &FilterCoefficients) -> Self {
        let q25 = FILTER_COEFF_Q25 as f64;
        let q24 = FILTER_COEFF_Q24 as f64;
        Self {
            bypass: coeffs.bypass,
            aa: coeffs.aa as f64 / q25,
            bb: coeffs.bb as f64 / q25,
            kk: coeffs.kk as f64 / q24,
            pp: coeffs.pp as f64 / q25,
            x1: 0.0,
            s1: 0.0,
            y1: 0.0,
        }
    }

    /// Clear the carried state. Called once at session start.
    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.s1 = 0.0;
        self.y1 = 0.0;
    }

    /// Filter a block in place, carrying state into the next block.
    pub fn apply(&mut self, samples: &mut [i32]) {
        if self.bypass {
            return;
        }
        for sample in samples.iter_mut() {
            let x = *sample as f64;
            let s = x + self.bb * self.x1 - self.aa * self.s1;
            let y = self.kk * (s + self.pp * self.y1);
            self.x1 = x;
            self.s1 = s;
            self.y1 = y;
            *sample = y.round() as i32;
        }
    }
}

/// Pack calibrated counts to the configured bit width, little endian.
/// 16-bit output is signed; 8-bit output is the offset-binary top byte.
pub fn pack(resolution: Resolution, samples: &[i32]) -> Bytes {
    match resolution {
        Resolution::Bits16 => {
            let mut out = vec![0u8; samples.len() * 2];
            for (i, &s) in samples.iter().enumerate() {
                let v = s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                LittleEndian::write_i16(&mut out[i * 2..i * 2 + 2], v);
            }
            Bytes::from(out)
        }
        Resolution::Bits8 => {
            let out: Vec<u8> = samples
                .iter()
                .map(|&s| {
                    let v = s.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                    ((v >> 8) + 128) as u8
                })
                .collect();
            Bytes::from(out)
        }
    }
}

/// Inverse of [`pack`], back to counts at 16-bit scale. Used by the
/// deferred CSV conversion and the file round-trip tests; 8-bit packing
/// loses the low byte by design.
pub fn unpack(resolution: Resolution, payload: &[u8]) -> Vec<i32> {
    match resolution {
        Resolution::Bits16 => payload
            .chunks_exact(2)
            .map(|c| LittleEndian::read_i16(c) as i32)
            .collect(),
        Resolution::Bits8 => payload
            .iter()
            .map(|&b| ((b as i32) - 128) << 8)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrate_applies_gain_then_offset() {
        let params = CalibrationParams { offset: 10, gain: 2.0 };
        assert_eq!(calibrate(100, &params), 210);
        assert_eq!(calibrate(-3, &CalibrationParams::default()), -3);
    }

    #[test]
    fn bypass_is_identity_for_any_input() {
        let mut filter = EqFilter::new(&FilterCoefficients::default());
        let original: Vec<i32> = (-50..50).map(|i| i * 37).collect();
        let mut samples = original.clone();
        filter.apply(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn filter_state_carries_across_blocks() {
        let coeffs = FilterCoefficients {
            aa: FILTER_COEFF_Q25 / 4,
            bb: FILTER_COEFF_Q25 / 8,
            kk: FILTER_COEFF_Q24,
            pp: 0,
            bypass: false,
        };
        coeffs.validate().unwrap();

        // One long block must equal the same data fed as two blocks.
        let input: Vec<i32> = (0..32).map(|i| 1000 - i * 64).collect();
        let mut whole = input.clone();
        let mut f1 = EqFilter::new(&coeffs);
        f1.apply(&mut whole);

        let mut first = input[..16].to_vec();
        let mut second = input[16..].to_vec();
        let mut f2 = EqFilter::new(&coeffs);
        f2.apply(&mut first);
        f2.apply(&mut second);
        first.extend_from_slice(&second);
        assert_eq!(whole, first);
    }

    #[test]
    fn reset_clears_state() {
        let coeffs = FilterCoefficients {
            aa: FILTER_COEFF_Q25 / 2,
            bb: 0,
            kk: FILTER_COEFF_Q24,
            pp: 0,
            bypass: false,
        };
        let mut filter = EqFilter::new(&coeffs);
        let mut warmup = vec![500i32; 8];
        filter.apply(&mut warmup);

        let mut fresh = EqFilter::new(&coeffs);
        let mut a = vec![123i32, -456, 789];
        let mut b = a.clone();
        filter.reset();
        filter.apply(&mut a);
        fresh.apply(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn pack_16_round_trips() {
        let samples = vec![0, 1, -1, 4096, -4096, i16::MAX as i32, i16::MIN as i32];
        let packed = pack(Resolution::Bits16, &samples);
        assert_eq!(packed.len(), samples.len() * 2);
        assert_eq!(unpack(Resolution::Bits16, &packed), samples);
    }

    #[test]
    fn pack_16_clamps_out_of_range() {
        let packed = pack(Resolution::Bits16, &[1 << 20, -(1 << 20)]);
        assert_eq!(
            unpack(Resolution::Bits16, &packed),
            vec![i16::MAX as i32, i16::MIN as i32]
        );
    }

    #[test]
    fn pack_8_keeps_top_byte() {
        let samples = vec![0, 256, -256, i16::MAX as i32];
        let packed = pack(Resolution::Bits8, &samples);
        assert_eq!(packed.len(), samples.len());
        assert_eq!(unpack(Resolution::Bits8, &packed), vec![0, 256, -256, 32512]);
    }
}
