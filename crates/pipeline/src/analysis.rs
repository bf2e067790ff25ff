//! Post-hoc audio analysis for the audio-quality probe

use voiceci_core::audio;

/// Window used for energy-consistency measurement.
const WINDOW_MS: u64 = 100;
/// Samples at or beyond this magnitude count as clipped.
const CLIP_MAGNITUDE: i16 = 32_700;
/// Windows below this RMS are treated as silence and skipped.
const ACTIVE_RMS_FLOOR: f64 = 200.0;

/// Metrics over an accumulated agent-audio buffer (24 kHz mono).
#[derive(Debug, Clone, Copy)]
pub struct AudioAnalysis {
    /// Fraction of samples at the clip rail.
    pub clipping_ratio: f64,
    /// Coefficient of variation of windowed RMS over active windows.
    /// Lower is steadier; 0.0 when fewer than two active windows exist.
    pub energy_consistency: f64,
    pub duration_ms: u64,
}

impl AudioAnalysis {
    pub fn of(samples: &[i16]) -> Self {
        let duration_ms = audio::duration_ms(samples.len(), audio::CANONICAL_RATE_HZ);

        if samples.is_empty() {
            return Self {
                clipping_ratio: 0.0,
                energy_consistency: 0.0,
                duration_ms: 0,
            };
        }

        let clipped = samples
            .iter()
            .filter(|s| s.unsigned_abs() >= CLIP_MAGNITUDE as u16)
            .count();
        let clipping_ratio = clipped as f64 / samples.len() as f64;

        let window = audio::samples_for_ms(WINDOW_MS, audio::CANONICAL_RATE_HZ);
        let window_rms: Vec<f64> = samples
            .chunks(window)
            .filter(|chunk| chunk.len() == window)
            .map(audio::rms)
            .filter(|&r| r >= ACTIVE_RMS_FLOOR)
            .collect();

        let energy_consistency = if window_rms.len() < 2 {
            0.0
        } else {
            let mean = window_rms.iter().sum::<f64>() / window_rms.len() as f64;
            let variance = window_rms.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
                / window_rms.len() as f64;
            variance.sqrt() / mean
        };

        Self {
            clipping_ratio,
            energy_consistency,
            duration_ms,
        }
    }
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
    fn clean_tone_has_no_clipping_and_steady_energy() {
        let analysis = AudioAnalysis::of(&tone(1000, 10_000.0));
        assert_eq!(analysis.clipping_ratio, 0.0);
        assert!(analysis.energy_consistency < 0.05);
        assert_eq!(analysis.duration_ms, 1000);
    }

    #[test]
    fn clipped_signal_is_flagged() {
        let clipped: Vec<i16> = tone(500, 10_000.0)
            .into_iter()
            .map(|s| if s > 5_000 { i16::MAX } else { s })
            .collect();
        let analysis = AudioAnalysis::of(&clipped);
        assert!(analysis.clipping_ratio > 0.1);
    }

    #[test]
    fn uneven_energy_raises_variation() {
        let loud = tone(500, 16_000.0);
        let quiet = tone(500, 1_000.0);
        let analysis = AudioAnalysis::of(&[loud, quiet].concat());
        assert!(analysis.energy_consistency > 0.3);
    }

    #[test]
    fn empty_buffer() {
        let analysis = AudioAnalysis::of(&[]);
        assert_eq!(analysis.duration_ms, 0);
        assert_eq!(analysis.clipping_ratio, 0.0);
    }
}
