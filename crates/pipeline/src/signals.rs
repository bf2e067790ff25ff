//! Deterministic signal generators and SNR-controlled mixing
//!
//! Noise-resilience trials need reproducible noise beds, so every generator
//! is seeded. All output is mono int16 at the canonical 24 kHz rate,
//! normalised to a target RMS.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use voiceci_core::audio;

const GENERATOR_SEED: u64 = 0x0a5d_10c1;

/// Silence of the given duration.
pub fn silence(ms: u64) -> Vec<i16> {
    vec![0i16; audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ)]
}

/// Uniform white noise normalised to `target_rms`.
pub fn white_noise(ms: u64, target_rms: f64) -> Vec<i16> {
    let n = audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ);
    let mut rng = StdRng::seed_from_u64(GENERATOR_SEED);
    let raw: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    normalise(&raw, target_rms)
}

/// Babble-like noise: a 6-tap moving average of white noise, which rolls off
/// the high end into something resembling overlapping talkers.
pub fn babble_noise(ms: u64, target_rms: f64) -> Vec<i16> {
    const TAPS: usize = 6;
    let n = audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ);
    let mut rng = StdRng::seed_from_u64(GENERATOR_SEED ^ 0xbabb1e);

    let white: Vec<f64> = (0..n + TAPS).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let raw: Vec<f64> = (0..n)
        .map(|i| white[i..i + TAPS].iter().sum::<f64>() / TAPS as f64)
        .collect();
    normalise(&raw, target_rms)
}

/// Pink noise via the Voss-McCartney algorithm with 8 octave rows.
pub fn pink_noise(ms: u64, target_rms: f64) -> Vec<i16> {
    const OCTAVES: usize = 8;
    let n = audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ);
    let mut rng = StdRng::seed_from_u64(GENERATOR_SEED ^ 0x0b1c);

    let mut rows = [0.0f64; OCTAVES];
    for row in rows.iter_mut() {
        *row = rng.gen_range(-1.0..1.0);
    }

    let mut raw = Vec::with_capacity(n);
    for counter in 0..n {
        // Update the row indexed by the lowest set bit of the counter; higher
        // rows change exponentially less often, giving the 1/f slope.
        let idx = (counter + 1).trailing_zeros() as usize;
        if idx < OCTAVES {
            rows[idx] = rng.gen_range(-1.0..1.0);
        }
        let sum: f64 = rows.iter().sum::<f64>() + rng.gen_range(-1.0..1.0);
        raw.push(sum / (OCTAVES + 1) as f64);
    }
    normalise(&raw, target_rms)
}

/// Mix noise under a clean signal at a target SNR.
///
/// The noise scale factor is `rms(clean) / (rms(noise) * 10^(snr/20))`; adds
/// saturate at the int16 bounds. Noise shorter than the clean buffer wraps.
pub fn mix_audio(clean: &[i16], noise: &[i16], snr_db: f64) -> Vec<i16> {
    let clean_rms = audio::rms(clean);
    let noise_rms = audio::rms(noise);
    if clean_rms == 0.0 || noise_rms == 0.0 || noise.is_empty() {
        return clean.to_vec();
    }

    let scale = clean_rms / (noise_rms * 10f64.powf(snr_db / 20.0));

    clean
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let n = noise[i % noise.len()] as f64 * scale;
            (c as f64 + n).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

fn normalise(raw: &[f64], target_rms: f64) -> Vec<i16> {
    let sum_squares: f64 = raw.iter().map(|s| s * s).sum();
    let rms = (sum_squares / raw.len().max(1) as f64).sqrt();
    if rms == 0.0 {
        return vec![0; raw.len()];
    }

    let gain = target_rms / rms;
    raw.iter()
        .map(|&s| (s * gain).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(ms: u64, amplitude: f64) -> Vec<i16> {
        let n = audio::samples_for_ms(ms, audio::CANONICAL_RATE_HZ);
        (0..n)
            .map(|i| {
                let t = i as f64 / audio::CANONICAL_RATE_HZ as f64;
                ((t * 440.0 * 2.0 * std::f64::consts::PI).sin() * amplitude) as i16
            })
            .collect()
    }

    #[test]
    fn generators_hit_target_rms() {
        for noise in [
            white_noise(500, 3000.0),
            babble_noise(500, 3000.0),
            pink_noise(500, 3000.0),
        ] {
            let measured = audio::rms(&noise);
            assert!(
                (measured - 3000.0).abs() / 3000.0 < 0.05,
                "rms {} off target",
                measured
            );
        }
    }

    #[test]
    fn generators_are_deterministic() {
        assert_eq!(white_noise(100, 2000.0), white_noise(100, 2000.0));
        assert_eq!(pink_noise(100, 2000.0), pink_noise(100, 2000.0));
    }

    #[test]
    fn mix_snr_law_within_half_db() {
        let clean = tone(500, 9000.0);

        for snr in [5.0, 10.0, 20.0] {
            let noise = white_noise(500, 3000.0);
            let mixed = mix_audio(&clean, &noise, snr);

            // Recover the injected noise by subtracting the clean signal.
            let residual: Vec<i16> = mixed
                .iter()
                .zip(clean.iter())
                .map(|(&m, &c)| (m as i32 - c as i32).clamp(-32768, 32767) as i16)
                .collect();

            let measured_snr =
                20.0 * (audio::rms(&clean) / audio::rms(&residual).max(1e-9)).log10();
            assert!(
                (measured_snr - snr).abs() <= 0.5,
                "snr {} measured {}",
                snr,
                measured_snr
            );
        }
    }

    #[test]
    fn mix_with_silent_noise_is_identity() {
        let clean = tone(100, 8000.0);
        assert_eq!(mix_audio(&clean, &silence(100), 10.0), clean);
    }

    #[test]
    fn mix_wraps_short_noise_beds() {
        let clean = tone(200, 8000.0);
        let noise = white_noise(50, 3000.0);
        let mixed = mix_audio(&clean, &noise, 10.0);
        assert_eq!(mixed.len(), clean.len());
        assert_ne!(mixed, clean);
    }
}
