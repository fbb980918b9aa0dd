use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Analysis window length in samples.
pub const FRAME_SIZE: usize = 512;
/// Hop between consecutive windows (50% overlap).
pub const HOP_SIZE: usize = 256;
/// Number of binned cepstral coefficients per frame.
pub const NUM_COEFFS: usize = 13;

/// Fixed input domain for feature normalization.
const NORM_MIN: f32 = -100.0;
const NORM_MAX: f32 = 100.0;

/// Per-frame spectral features, normalized from [-100, 100] to [0, 1].
///
/// The normalization is a plain affine map with no clamping: a value outside
/// the declared domain (a spectral centroid above bin 100, say) lands outside
/// [0, 1]. That is the documented behavior, kept for numeric parity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub mfcc: [f32; NUM_COEFFS],
    pub spectral_centroid: f32,
    pub rms: f32,
    pub zcr: f32,
}

/// Slice `samples` into overlapping fixed-size analysis windows.
///
/// Yields zero frames when the input is shorter than one window; the final
/// partial window is dropped, never padded. The iterator borrows `samples`
/// and can be recreated from them at will.
pub fn frames(samples: &[f32]) -> impl Iterator<Item = &[f32]> + '_ {
    samples.windows(FRAME_SIZE).step_by(HOP_SIZE)
}

/// Number of frames `frames` will yield for an input of `len` samples.
pub fn frame_count(len: usize) -> usize {
    if len < FRAME_SIZE {
        0
    } else {
        (len - FRAME_SIZE) / HOP_SIZE + 1
    }
}

/// Computes per-frame feature vectors. Holds a planned FFT so repeated
/// extraction does not re-plan.
pub struct FeatureExtractor {
    fft: Arc<dyn Fft<f32>>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FRAME_SIZE),
        }
    }

    /// Extract features for every frame of `samples`.
    pub fn extract_all(&self, samples: &[f32]) -> Vec<FeatureVector> {
        frames(samples).map(|frame| self.extract(frame)).collect()
    }

    /// Extract the feature vector of a single 512-sample frame.
    pub fn extract(&self, frame: &[f32]) -> FeatureVector {
        debug_assert_eq!(frame.len(), FRAME_SIZE);

        let mut spectrum: Vec<Complex<f32>> =
            frame.iter().map(|&x| Complex::new(x, 0.0)).collect();
        self.fft.process(&mut spectrum);
        let magnitudes: Vec<f32> = spectrum[..FRAME_SIZE / 2]
            .iter()
            .map(|c| c.norm())
            .collect();

        let mut mfcc = [0.0f32; NUM_COEFFS];
        for (i, coeff) in mfcc.iter_mut().enumerate() {
            // Contiguous equal-width bins over the magnitude spectrum stand
            // in for a mel filter bank.
            let start = i * magnitudes.len() / NUM_COEFFS;
            let end = (i + 1) * magnitudes.len() / NUM_COEFFS;
            let sum: f32 = magnitudes[start..end].iter().sum();
            *coeff = normalize(sum / (end - start) as f32);
        }

        FeatureVector {
            mfcc,
            spectral_centroid: normalize(spectral_centroid(&magnitudes)),
            rms: normalize(rms(frame)),
            zcr: normalize(zero_crossing_rate(frame)),
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Magnitude-weighted mean bin index; 0 for an all-zero spectrum.
fn spectral_centroid(magnitudes: &[f32]) -> f32 {
    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    for (i, &m) in magnitudes.iter().enumerate() {
        weighted += i as f32 * m;
        total += m;
    }
    if total == 0.0 {
        0.0
    } else {
        weighted / total
    }
}

fn rms(frame: &[f32]) -> f32 {
    let sum_sq: f32 = frame.iter().map(|&x| x * x).sum();
    (sum_sq / frame.len() as f32).sqrt()
}

/// Fraction of adjacent sample pairs whose sign differs. Zero counts as
/// non-negative.
fn zero_crossing_rate(frame: &[f32]) -> f32 {
    let crossings = frame
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();
    crossings as f32 / frame.len() as f32
}

fn normalize(value: f32) -> f32 {
    (value - NORM_MIN) / (NORM_MAX - NORM_MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq_hz: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| {
                (2.0 * std::f32::consts::PI * freq_hz * n as f32 / crate::wav::SAMPLE_RATE as f32)
                    .sin()
                    * 0.5
            })
            .collect()
    }

    #[test]
    fn frame_count_matches_formula() {
        assert_eq!(frame_count(0), 0);
        assert_eq!(frame_count(FRAME_SIZE - 1), 0);
        assert_eq!(frame_count(FRAME_SIZE), 1);
        assert_eq!(frame_count(1023), 2);
        assert_eq!(frame_count(1024), 3);
        for len in [FRAME_SIZE, 1000, 4096, 32_000] {
            let samples = vec![0.0f32; len];
            assert_eq!(frames(&samples).count(), frame_count(len));
        }
    }

    #[test]
    fn short_input_yields_no_frames() {
        let samples = vec![0.1f32; FRAME_SIZE - 1];
        assert_eq!(frames(&samples).count(), 0);
    }

    #[test]
    fn silence_normalizes_to_midpoint() {
        let extractor = FeatureExtractor::new();
        let fv = extractor.extract(&vec![0.0f32; FRAME_SIZE]);
        // Every raw feature of silence is 0, mapped to (0+100)/200.
        assert!(fv.mfcc.iter().all(|&c| c == 0.5));
        assert_eq!(fv.spectral_centroid, 0.5);
        assert_eq!(fv.rms, 0.5);
        assert_eq!(fv.zcr, 0.5);
    }

    #[test]
    fn rms_of_constant_frame() {
        let extractor = FeatureExtractor::new();
        let fv = extractor.extract(&vec![0.5f32; FRAME_SIZE]);
        // raw rms 0.5 -> (0.5+100)/200
        assert!((fv.rms - 0.5025).abs() < 1e-6);
        // No sign changes in a positive constant signal.
        assert_eq!(fv.zcr, 0.5);
    }

    #[test]
    fn zcr_counts_sign_changes() {
        let frame: Vec<f32> = (0..FRAME_SIZE)
            .map(|n| if n % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let extractor = FeatureExtractor::new();
        let fv = extractor.extract(&frame);
        let raw = (FRAME_SIZE - 1) as f32 / FRAME_SIZE as f32;
        assert!((fv.zcr - (raw + 100.0) / 200.0).abs() < 1e-6);
    }

    #[test]
    fn tone_concentrates_energy_in_one_bin() {
        // 440 Hz at 16 kHz over 512 samples sits near bin 14, inside the
        // first of the 13 equal-width bands.
        let extractor = FeatureExtractor::new();
        let fv = extractor.extract(&tone(440.0, FRAME_SIZE));
        let first = fv.mfcc[0];
        assert!(fv.mfcc[1..].iter().all(|&c| c < first));
    }

    #[test]
    fn centroid_is_not_clamped_to_unit_range() {
        // A tone near bin 200 pushes the raw centroid past the declared
        // domain maximum of 100, so the normalized value exceeds 1.
        let freq = 200.0 * crate::wav::SAMPLE_RATE as f32 / FRAME_SIZE as f32;
        let extractor = FeatureExtractor::new();
        let fv = extractor.extract(&tone(freq, FRAME_SIZE));
        assert!(fv.spectral_centroid > 1.0);
    }

    #[test]
    fn extraction_is_deterministic() {
        let samples = tone(440.0, FRAME_SIZE * 4);
        let extractor = FeatureExtractor::new();
        let a = extractor.extract_all(&samples);
        let b = extractor.extract_all(&samples);
        assert_eq!(a, b);
    }
}
