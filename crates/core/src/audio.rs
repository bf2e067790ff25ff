//! Audio codec utilities
//!
//! All buffers in the system are signed 16-bit little-endian PCM, mono. The
//! canonical internal rate is 24 kHz; telephony legs run μ-law at 8 kHz and
//! WebRTC rooms at 48 kHz, so conversion happens at the channel boundary.

/// Canonical internal sample rate.
pub const CANONICAL_RATE_HZ: u32 = 24_000;
/// Telephony wire rate (μ-law).
pub const TELEPHONY_RATE_HZ: u32 = 8_000;
/// Default WebRTC room rate.
pub const WEBRTC_RATE_HZ: u32 = 48_000;

const MULAW_BIAS: i16 = 132;
const MULAW_CLIP: i16 = 32_635;

/// Encode one linear PCM sample as G.711 μ-law.
fn linear_to_mulaw(sample: i16) -> u8 {
    let sign: u8 = if sample < 0 { 0x80 } else { 0x00 };
    let mag = (sample as i32).abs().min(MULAW_CLIP as i32) as i16 + MULAW_BIAS;

    let exponent: u8 = if mag < 256 {
        0
    } else if mag < 512 {
        1
    } else if mag < 1024 {
        2
    } else if mag < 2048 {
        3
    } else if mag < 4096 {
        4
    } else if mag < 8192 {
        5
    } else if mag < 16384 {
        6
    } else {
        7
    };

    let mantissa = ((mag >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one G.711 μ-law byte back to linear PCM.
fn mulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i16;

    let mag = ((((mantissa) << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -mag
    } else {
        mag
    }
}

/// Encode a PCM buffer as μ-law.
pub fn pcm_to_mulaw(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_mulaw(s)).collect()
}

/// Decode a μ-law buffer back to PCM.
pub fn mulaw_to_pcm(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| mulaw_to_linear(b)).collect()
}

/// Resample a mono PCM buffer between rates by linear interpolation.
///
/// Identity when the rates match. Supports any positive rate pair; the
/// channel layer uses it for 8/16/24/48 kHz conversions.
pub fn resample(samples: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_hz as f64 / from_hz as f64;
    let new_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len() - 1);
        let frac = src_idx - idx_floor as f64;

        let a = samples[idx_floor.min(samples.len() - 1)] as f64;
        let b = samples[idx_ceil] as f64;
        out.push((a * (1.0 - frac) + b * frac).round() as i16);
    }

    out
}

/// Interpret little-endian PCM bytes as samples. Odd trailing bytes are dropped.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Serialize samples as little-endian PCM bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Root-mean-square level of a buffer, in raw sample units.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Duration of a sample buffer at a given rate.
pub fn duration_ms(len: usize, rate_hz: u32) -> u64 {
    (len as u64 * 1000) / rate_hz as u64
}

/// Number of samples covering `ms` milliseconds at a given rate.
pub fn samples_for_ms(ms: u64, rate_hz: u32) -> usize {
    (ms as usize * rate_hz as usize) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_round_trip_within_quantisation_error() {
        let ramp: Vec<i16> = (-16_000..16_000).step_by(37).collect();
        let decoded = mulaw_to_pcm(&pcm_to_mulaw(&ramp));

        for (&x, &y) in ramp.iter().zip(decoded.iter()) {
            // Segment step size is bounded by (|x| + bias) / 16, floor 8.
            let bound = ((x.unsigned_abs() as i32 + 132) / 16).max(8);
            let err = (x as i32 - y as i32).abs();
            assert!(err <= bound, "x={} y={} err={} bound={}", x, y, err, bound);
        }
    }

    #[test]
    fn mulaw_clips_extremes() {
        let extremes = [i16::MIN, -32_700, 32_700, i16::MAX];
        let decoded = mulaw_to_pcm(&pcm_to_mulaw(&extremes));
        assert!(decoded[0] < -31_000);
        assert!(decoded[3] > 31_000);
    }

    #[test]
    fn resample_identity() {
        let buf = vec![1i16, 2, 3, 4];
        assert_eq!(resample(&buf, 24_000, 24_000), buf);
    }

    #[test]
    fn resample_round_trip_preserves_length_and_level() {
        // 100ms of a 440 Hz tone at 24 kHz.
        let tone: Vec<i16> = (0..2400)
            .map(|i| {
                let t = i as f64 / 24_000.0;
                ((t * 440.0 * 2.0 * std::f64::consts::PI).sin() * 12_000.0) as i16
            })
            .collect();

        let down = resample(&tone, 24_000, 8_000);
        let back = resample(&down, 8_000, 24_000);

        assert!((back.len() as i64 - tone.len() as i64).abs() <= 1);
        let r0 = rms(&tone);
        let r1 = rms(&back);
        assert!((r1 - r0).abs() / r0 < 0.02, "rms drift {} -> {}", r0, r1);
    }

    #[test]
    fn pcm_byte_round_trip() {
        let samples = vec![0i16, -1, 32_767, -32_768, 1234];
        let bytes = samples_to_pcm_bytes(&samples);
        assert_eq!(pcm_bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn duration_helpers() {
        assert_eq!(duration_ms(24_000, 24_000), 1000);
        assert_eq!(samples_for_ms(20, 8_000), 160);
    }
}
