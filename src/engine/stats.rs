use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{AveragePoint, HeatmapCell, TrendPoint};

/// One finalized session as seen by the aggregator. Callers supply the
/// list in chronological order with mistakes in catalog order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedSession {
    pub date: NaiveDate,
    pub total_points: u32,
    pub mistakes: Vec<(Ulid, u32)>,
}

/// Chronological `(date, total_points, top mistake)` series. The top item
/// is the highest count; ties go to the earlier catalog item.
pub fn trend_series(sessions: &[FinalizedSession]) -> Vec<TrendPoint> {
    sessions
        .iter()
        .map(|s| {
            let mut top: Option<(Ulid, u32)> = None;
            for &(item, count) in &s.mistakes {
                if top.is_none_or(|(_, best)| count > best) {
                    top = Some((item, count));
                }
            }
            TrendPoint {
                date: s.date,
                total_points: s.total_points,
                top_item: top.map(|(item, _)| item),
            }
        })
        .collect()
}

/// Full session × item matrix, zero cells included, so clients can render
/// a rectangular grid without touching the catalog themselves.
pub fn heatmap(sessions: &[FinalizedSession], items: &[Ulid]) -> Vec<HeatmapCell> {
    let mut cells = Vec::with_capacity(sessions.len() * items.len());
    for (session_index, session) in sessions.iter().enumerate() {
        for &item_id in items {
            let count = session
                .mistakes
                .iter()
                .find(|(id, _)| *id == item_id)
                .map(|(_, c)| *c)
                .unwrap_or(0);
            cells.push(HeatmapCell { session_index, item_id, count });
        }
    }
    cells
}

/// Running simple moving average of `total_points` over the series: each
/// point averages the last `window` sessions (fewer at the head).
pub fn moving_average(sessions: &[FinalizedSession], window: usize) -> Vec<AveragePoint> {
    if window == 0 {
        return Vec::new();
    }
    sessions
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let lo = (i + 1).saturating_sub(window);
            let span = &sessions[lo..=i];
            let sum: u64 = span.iter().map(|s| u64::from(s.total_points)).sum();
            AveragePoint {
                session_index: i,
                date: s.date,
                average: sum as f64 / span.len() as f64,
            }
        })
        .collect()
}
