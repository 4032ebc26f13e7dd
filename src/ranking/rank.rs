use super::aggregate::{StudentMetrics, NO_ZSCORE_SENTINEL};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RankingMethod {
    #[default]
    #[serde(rename = "totalMarks")]
    TotalMarks,
    #[serde(rename = "average")]
    Average,
    #[serde(rename = "zscore")]
    ZScore,
}

impl RankingMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "totalMarks" => Some(Self::TotalMarks),
            "average" => Some(Self::Average),
            "zscore" => Some(Self::ZScore),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TotalMarks => "totalMarks",
            Self::Average => "average",
            Self::ZScore => "zscore",
        }
    }

    pub fn metric(self, m: &StudentMetrics) -> f64 {
        match self {
            Self::TotalMarks => m.total_marks,
            Self::Average => m.average,
            Self::ZScore => m.z_score.unwrap_or(NO_ZSCORE_SENTINEL),
        }
    }
}

/// Competition ranks for values already sorted in descending order.
///
/// Equal neighbours share a rank; otherwise the rank is the 1-based position.
pub fn competition_ranks(sorted: &[f64]) -> Vec<u32> {
    let mut ranks: Vec<u32> = Vec::with_capacity(sorted.len());
    for (i, v) in sorted.iter().enumerate() {
        let rank = match ranks.last() {
            Some(&prev) if sorted[i - 1] == *v => prev,
            _ => (i + 1) as u32,
        };
        ranks.push(rank);
    }
    ranks
}

/// The sort is stable, so tied rows keep their incoming order.
pub fn rank_by<T, F>(mut rows: Vec<T>, key: F) -> Vec<(u32, T)>
where
    F: Fn(&T) -> f64,
{
    rows.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
    let values: Vec<f64> = rows.iter().map(&key).collect();
    competition_ranks(&values).into_iter().zip(rows).collect()
}
