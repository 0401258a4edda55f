use crate::models::policy::PassThresholds;
use crate::models::typing::TypingMetrics;

/// Keystroke samples needed before consistency is reported.
pub const MIN_CONSISTENCY_SAMPLES: usize = 6;

const CHARS_PER_WORD: f64 = 5.0;

pub struct TypingMetricsService;

impl TypingMetricsService {
    /// Compares `typed` against `reference` character by character.
    ///
    /// Characters typed past the end of the reference count as errors. Accuracy is kept
    /// unrounded so that 100 is reported exactly when `typed` is an error-free prefix.
    pub fn compute(
        reference: &str,
        typed: &str,
        elapsed_seconds: f64,
        keystrokes: &[i64],
    ) -> TypingMetrics {
        let reference: Vec<char> = reference.chars().collect();

        let mut total_chars = 0usize;
        let mut correct_chars = 0usize;
        for (i, c) in typed.chars().enumerate() {
            total_chars += 1;
            if reference.get(i) == Some(&c) {
                correct_chars += 1;
            }
        }
        let error_chars = total_chars - correct_chars;

        let accuracy = if total_chars == 0 {
            0.0
        } else {
            correct_chars as f64 / total_chars as f64 * 100.0
        };

        TypingMetrics {
            wpm: Self::wpm(total_chars, elapsed_seconds),
            accuracy,
            consistency: Self::consistency(keystrokes),
            elapsed_seconds: elapsed_seconds.max(0.0),
            total_chars,
            correct_chars,
            error_chars,
        }
    }

    pub fn wpm(total_chars: usize, elapsed_seconds: f64) -> u32 {
        if elapsed_seconds <= 0.0 || !elapsed_seconds.is_finite() {
            return 0;
        }
        let words = total_chars as f64 / CHARS_PER_WORD;
        (words / (elapsed_seconds / 60.0)).round() as u32
    }

    /// `100 - stddev(intervals) / 10`, clamped to [0, 100]. Zero with too few samples.
    pub fn consistency(keystrokes: &[i64]) -> f64 {
        if keystrokes.len() < MIN_CONSISTENCY_SAMPLES {
            return 0.0;
        }

        let intervals: Vec<f64> = keystrokes
            .windows(2)
            .map(|w| w[1] as f64 - w[0] as f64)
            .collect();
        let n = intervals.len() as f64;
        let mean = intervals.iter().sum::<f64>() / n;
        let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        (100.0 - std_dev / 10.0).clamp(0.0, 100.0).round()
    }

    /// True when timestamps are non-negative and never go backwards.
    pub fn keystrokes_well_formed(keystrokes: &[i64]) -> bool {
        keystrokes.iter().all(|t| *t >= 0) && keystrokes.windows(2).all(|w| w[0] <= w[1])
    }

    pub fn passed(metrics: &TypingMetrics, thresholds: &PassThresholds) -> bool {
        metrics.wpm >= thresholds.typing_wpm && metrics.accuracy >= thresholds.typing_accuracy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        let c = TypingMetricsService::consistency(&[i64::MIN, i64::MAX, 0, 1, 2, 3]);
        assert_eq!(c, 0.0);
        assert!(!TypingMetricsService::keystrokes_well_formed(&[i64::MIN, i64::MAX]));
        assert!(!TypingMetricsService::keystrokes_well_formed(&[10, 5]));
        assert!(TypingMetricsService::keystrokes_well_formed(&[0, 5, 5, 90]));
    }

    #[test]
    fn substitution_counts_as_error() {
        let m = TypingMetricsService::compute("hello", "helo", 10.0, &[]);
        assert_eq!(m.total_chars, 4);
        assert_eq!(m.correct_chars, 3);
        assert_eq!(m.error_chars, 1);
        assert_eq!(m.accuracy, 75.0);
        assert_eq!(m.consistency, 0.0);
    }

    #[test]
    fn clean_prefix_is_fully_accurate() {
        let m = TypingMetricsService::compute("The quick brown fox", "The quick", 9.0, &[]);
        assert_eq!(m.total_chars, 9);
        assert_eq!(m.correct_chars, 9);
        assert_eq!(m.accuracy, 100.0);
        assert_eq!(m.wpm, 12);
    }

    #[test]
    fn empty_transcript_yields_zeros() {
        let m = TypingMetricsService::compute("anything", "", 42.0, &[]);
        assert_eq!(m.wpm, 0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.consistency, 0.0);
    }

    #[test]
    fn zero_elapsed_means_zero_wpm() {
        let m = TypingMetricsService::compute("abc", "abc", 0.0, &[]);
        assert_eq!(m.wpm, 0);
        assert_eq!(m.accuracy, 100.0);
    }

    #[test]
    fn overflow_past_reference_is_error() {
        let m = TypingMetricsService::compute("ab", "abcd", 60.0, &[]);
        assert_eq!(m.correct_chars, 2);
        assert_eq!(m.error_chars, 2);
        assert_eq!(m.accuracy, 50.0);
    }

    #[test]
    fn accuracy_never_rounds_up_to_perfect() {
        let reference = "a".repeat(1000);
        let mut typed = "a".repeat(999);
        typed.push('b');
        let m = TypingMetricsService::compute(&reference, &typed, 60.0, &[]);
        assert!(m.accuracy < 100.0);
        assert!(m.accuracy >= 0.0);
    }

    #[test]
    fn steady_rhythm_is_fully_consistent() {
        let keys = [0, 200, 400, 600, 800, 1000];
        assert_eq!(TypingMetricsService::consistency(&keys), 100.0);
    }

    #[test]
    fn consistency_needs_six_samples() {
        let keys = [0, 200, 400, 600, 800];
        assert_eq!(TypingMetricsService::consistency(&keys), 0.0);
    }

    #[test]
    fn erratic_rhythm_is_clamped() {
        let keys = [0, 10, 5000, 5010, 20000, 20010];
        assert_eq!(TypingMetricsService::consistency(&keys), 0.0);
    }

    #[test]
    fn uneven_rhythm_lowers_consistency() {
        // intervals 100, 300, 100, 300, 100: mean 180, stddev ~97.98
        let keys = [0, 100, 400, 500, 800, 900];
        assert_eq!(TypingMetricsService::consistency(&keys), 90.0);
    }

    #[test]
    fn same_input_same_output() {
        let keys = [0, 120, 260, 390, 500, 640, 800];
        let a = TypingMetricsService::compute("hello world", "hello wrld", 7.5, &keys);
        let b = TypingMetricsService::compute("hello world", "hello wrld", 7.5, &keys);
        assert_eq!(a, b);
    }

    #[test]
    fn pass_requires_speed_and_accuracy() {
        let t = PassThresholds::default();
        let mut m = TypingMetricsService::compute("hello", "hello", 60.0, &[]);
        m.wpm = 40;
        m.accuracy = 90.0;
        assert!(TypingMetricsService::passed(&m, &t));
        m.accuracy = 84.9;
        assert!(!TypingMetricsService::passed(&m, &t));
        m.accuracy = 95.0;
        m.wpm = 34;
        assert!(!TypingMetricsService::passed(&m, &t));
    }
}
