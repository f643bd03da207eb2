use crate::error::DomainError;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;

/// Grades are out of 20 unless a rubric says otherwise.
pub const SCORE_SCALE: f64 = 20.0;

/// Threshold used by correction statistics ("taux de réussite").
pub const DEFAULT_REPORT_PASS_THRESHOLD: f64 = 10.0;

/// Two-decimal rounding used for stored and displayed averages:
/// `Math.round(100*x) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mention {
    TresBien,
    Bien,
    AssezBien,
    Passable,
    Insuffisant,
}

impl Mention {
    /// Bands are closed at their lower bound: exactly 16.0 is "Très Bien".
    pub fn from_average(average: f64) -> Self {
        if average >= 16.0 {
            Self::TresBien
        } else if average >= 14.0 {
            Self::Bien
        } else if average >= 12.0 {
            Self::AssezBien
        } else if average >= 10.0 {
            Self::Passable
        } else {
            Self::Insuffisant
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TresBien => "Très Bien",
            Self::Bien => "Bien",
            Self::AssezBien => "Assez Bien",
            Self::Passable => "Passable",
            Self::Insuffisant => "Insuffisant",
        }
    }
}

impl Serialize for Mention {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.label())
    }
}

/// The two admission rules found in the exam workflows. They are kept apart on
/// purpose and selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPolicy {
    /// average >= 12 => "ADMIS", else "REFUSÉ"
    Admission12,
    /// average >= 10 => "admis", else "echec"
    Pass10,
}

impl PassPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admission12" => Some(Self::Admission12),
            "pass10" => Some(Self::Pass10),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admission12 => "admission12",
            Self::Pass10 => "pass10",
        }
    }

    pub fn threshold(self) -> f64 {
        match self {
            Self::Admission12 => 12.0,
            Self::Pass10 => 10.0,
        }
    }

    pub fn decide(self, average: f64) -> Decision {
        Decision {
            policy: self,
            passed: average >= self.threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub policy: PassPolicy,
    pub passed: bool,
}

impl Decision {
    pub fn label(self) -> &'static str {
        match (self.policy, self.passed) {
            (PassPolicy::Admission12, true) => "ADMIS",
            (PassPolicy::Admission12, false) => "REFUSÉ",
            (PassPolicy::Pass10, true) => "admis",
            (PassPolicy::Pass10, false) => "echec",
        }
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub average: f64,
    pub mention: Mention,
    pub status: Decision,
    pub subject_count: usize,
    pub clamped_count: usize,
}

/// Mean of all subject scores, each clamped to `[0, SCORE_SCALE]` first.
pub fn aggregate<'a, I>(scores: I, policy: PassPolicy) -> Result<Aggregate, DomainError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    let mut clamped_count = 0_usize;
    for (subject, score) in scores {
        if !score.is_finite() {
            return Err(DomainError::new(
                "bad_score",
                format!("score for {} must be a finite number", subject),
            )
            .with_details(serde_json::json!({ "subject": subject })));
        }
        let clamped = score.clamp(0.0, SCORE_SCALE);
        if clamped != score {
            clamped_count += 1;
        }
        sum += clamped;
        count += 1;
    }
    if count == 0 {
        return Err(DomainError::new("no_scores", "at least one subject score is required"));
    }

    let average = sum / (count as f64);
    Ok(Aggregate {
        average,
        mention: Mention::from_average(average),
        status: policy.decide(average),
        subject_count: count,
        clamped_count,
    })
}

fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionStats {
    pub count: usize,
    pub average: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
    /// Percentage in `[0, 100]`.
    pub pass_rate: f64,
    pub pass_threshold: f64,
}

/// Returns `None` for an empty score list; there is nothing to summarize.
pub fn correction_stats(scores: &[f64], pass_threshold: f64) -> Option<CorrectionStats> {
    if scores.is_empty() {
        return None;
    }
    let count = scores.len();
    let sum: f64 = scores.iter().sum();
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let passed = scores.iter().filter(|s| **s >= pass_threshold).count();
    Some(CorrectionStats {
        count,
        average: sum / (count as f64),
        median: compute_median(scores),
        max,
        min,
        pass_rate: 100.0 * (passed as f64) / (count as f64),
        pass_threshold,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub pending: usize,
    pub in_progress: usize,
    pub corrected: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent_corrected(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * (self.corrected as f64) / (self.total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn subjects(pairs: &[(&'static str, f64)]) -> Vec<(&'static str, f64)> {
        pairs.to_vec()
    }

    #[test]
    fn round_off_two_decimals() {
        assert_eq!(round_off_2_decimals(0.0), 0.0);
        assert_eq!(round_off_2_decimals(12.345), 12.35);
        assert_eq!(round_off_2_decimals(15.0), 15.0);
        assert_eq!(round_off_2_decimals(13.3333333), 13.33);
    }

    #[test]
    fn four_subject_example_is_bien_and_admitted() {
        let scores = subjects(&[("maths", 18.0), ("francais", 12.0), ("anglais", 14.0), ("pc", 16.0)]);
        let agg = aggregate(scores, PassPolicy::Admission12).expect("aggregate");
        assert_eq!(agg.average, 15.0);
        assert_eq!(agg.mention, Mention::Bien);
        assert_eq!(agg.status.label(), "ADMIS");
        assert_eq!(agg.subject_count, 4);
    }

    #[test]
    fn mention_bands_are_closed_at_lower_bound() {
        assert_eq!(Mention::from_average(16.0), Mention::TresBien);
        assert_eq!(Mention::from_average(15.99), Mention::Bien);
        assert_eq!(Mention::from_average(14.0), Mention::Bien);
        assert_eq!(Mention::from_average(12.0), Mention::AssezBien);
        assert_eq!(Mention::from_average(11.99), Mention::Passable);
        assert_eq!(Mention::from_average(10.0), Mention::Passable);
        assert_eq!(Mention::from_average(9.99), Mention::Insuffisant);
        assert_eq!(Mention::from_average(0.0), Mention::Insuffisant);
    }

    #[test]
    fn policies_disagree_between_ten_and_twelve() {
        let scores = subjects(&[("maths", 11.0)]);
        let strict = aggregate(scores.clone(), PassPolicy::Admission12).expect("aggregate");
        let lenient = aggregate(scores, PassPolicy::Pass10).expect("aggregate");
        assert_eq!(strict.status.label(), "REFUSÉ");
        assert_eq!(lenient.status.label(), "admis");
        assert_eq!(PassPolicy::Pass10.decide(9.5).label(), "echec");
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let scores = subjects(&[("maths", 25.0), ("pc", -4.0)]);
        let agg = aggregate(scores, PassPolicy::Admission12).expect("aggregate");
        assert_eq!(agg.average, 10.0);
        assert_eq!(agg.clamped_count, 2);
    }

    #[test]
    fn empty_and_non_finite_inputs_are_errors() {
        let err = aggregate(Vec::<(&str, f64)>::new(), PassPolicy::Pass10).expect_err("empty");
        assert_eq!(err.code, "no_scores");
        let err = aggregate(subjects(&[("maths", f64::NAN)]), PassPolicy::Pass10).expect_err("nan");
        assert_eq!(err.code, "bad_score");
    }

    #[test]
    fn aggregate_is_idempotent_and_bounded_by_inputs() {
        let mut rng = StdRng::seed_from_u64(2024);
        for _ in 0..200 {
            let n = rng.gen_range(1..8);
            let values: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..=20.0)).collect();
            let pairs: Vec<(&str, f64)> = values.iter().map(|v| ("s", *v)).collect();
            let a = aggregate(pairs.clone(), PassPolicy::Admission12).expect("aggregate");
            let b = aggregate(pairs, PassPolicy::Admission12).expect("aggregate");
            assert_eq!(a, b);
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert!(a.average >= lo - 1e-9 && a.average <= hi + 1e-9);
        }
    }

    #[test]
    fn serialized_labels_are_french() {
        let agg = aggregate(subjects(&[("maths", 16.0)]), PassPolicy::Admission12).expect("aggregate");
        let v = serde_json::to_value(agg).expect("json");
        assert_eq!(v["mention"], "Très Bien");
        assert_eq!(v["status"], "ADMIS");
        assert_eq!(v["subjectCount"], 1);
    }

    #[test]
    fn stats_use_pass_threshold() {
        let stats = correction_stats(&[15.0, 12.0, 8.0, 10.0], 10.0).expect("stats");
        assert_eq!(stats.count, 4);
        assert_eq!(stats.average, 11.25);
        assert_eq!(stats.max, 15.0);
        assert_eq!(stats.min, 8.0);
        assert_eq!(stats.median, 11.0);
        assert_eq!(stats.pass_rate, 75.0);
        assert!(correction_stats(&[], 10.0).is_none());
    }

    #[test]
    fn progress_percentage() {
        let p = Progress {
            pending: 1,
            in_progress: 1,
            corrected: 2,
            total: 4,
        };
        assert_eq!(p.percent_corrected(), 50.0);
        let empty = Progress {
            pending: 0,
            in_progress: 0,
            corrected: 0,
            total: 0,
        };
        assert_eq!(empty.percent_corrected(), 0.0);
    }
}
