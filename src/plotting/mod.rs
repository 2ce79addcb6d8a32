use textplots::{Chart, Plot, Shape};

use crate::table::{format_value, ResultRow};
use crate::workflow::GroupBy;

/// Rows shown in a ranking before the listing is cut off
const RANKING_LIMIT: usize = 15;

/// (year, value) points for every row with a year and a finite value,
/// ordered by year.
pub fn series_points(rows: &[ResultRow]) -> Vec<(f64, f64)> {
    let mut points: Vec<(f64, f64)> = rows
        .iter()
        .filter(|r| r.value.is_finite())
        .filter_map(|r| r.year().map(|y| (y as f64, r.value)))
        .collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    points
}

/// Min, max and mean of the finite values
pub fn value_stats(rows: &[ResultRow]) -> Option<(f64, f64, f64)> {
    let values: Vec<f64> = rows.iter().map(|r| r.value).filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    let min = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Some((min, max, avg))
}

/// Terminal rendering of a result set
pub struct ResultPlotter {
    width: usize,
    height: usize,
}

impl ResultPlotter {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width: width.max(32),
            height: height.max(8),
        }
    }

    /// Line chart over years for a country, ranking for a year
    pub fn plot(&self, rows: &[ResultRow], group_by: GroupBy, title: &str) -> String {
        match group_by {
            GroupBy::Country => self.plot_time_series(rows, title),
            GroupBy::Year => self.plot_ranking(rows, title),
        }
    }

    pub fn plot_time_series(&self, rows: &[ResultRow], title: &str) -> String {
        let points = series_points(rows);
        if points.is_empty() {
            return format!("📊 No data available for '{}'", title);
        }

        let mut output = String::new();
        output.push_str(&format!("📊 Time Series: {}\n", title));
        if let Some((min, max, avg)) = value_stats(rows) {
            output.push_str(&format!(
                "📈 Data Points: {} | Min: {} | Max: {} | Avg: {}\n",
                points.len(),
                format_value(min),
                format_value(max),
                format_value(avg)
            ));
        }
        output.push_str(&"─".repeat(self.width));
        output.push('\n');

        let first_year = points[0].0;
        let last_year = points[points.len() - 1].0;
        // textplots needs a non-empty x range
        let x_max = if last_year > first_year { last_year } else { first_year + 1.0 };

        let plot_data: Vec<(f32, f32)> =
            points.iter().map(|&(x, y)| (x as f32, y as f32)).collect();
        let (width, height) = (self.width as u32, self.height as u32);
        let chart = Chart::new(width, height, first_year as f32, x_max as f32)
            .lineplot(&Shape::Lines(&plot_data))
            .to_string();
        output.push_str(&chart);
        output.push('\n');

        output.push_str(&format!("📅 Years: {} to {}\n", first_year, last_year));
        output.push_str(&"─".repeat(self.width));
        output
    }

    /// Top countries for a single year as horizontal bars
    pub fn plot_ranking(&self, rows: &[ResultRow], title: &str) -> String {
        let mut ranked: Vec<&ResultRow> = rows.iter().filter(|r| r.value.is_finite()).collect();
        if ranked.is_empty() {
            return format!("📊 No data available for '{}'", title);
        }
        ranked.sort_by(|a, b| b.value.total_cmp(&a.value));

        let shown = &ranked[..ranked.len().min(RANKING_LIMIT)];
        let name_width = shown.iter().map(|r| r.country.chars().count()).max().unwrap_or(0).min(28);
        let peak = shown.iter().map(|r| r.value.abs()).fold(0.0, f64::max);
        let bar_space = self.width.saturating_sub(name_width + 20).max(10);

        let mut output = String::new();
        output.push_str(&format!("📊 Ranking: {} ({} countries)\n", title, ranked.len()));
        output.push_str(&"─".repeat(self.width));
        output.push('\n');

        for row in shown {
            let bar_length = if peak > 0.0 {
                ((row.value.abs() / peak) * bar_space as f64).round() as usize
            } else {
                0
            };
            let name: String = row.country.chars().take(name_width).collect();
            output.push_str(&format!(
                "  {:<width$} {} {}\n",
                name,
                "█".repeat(bar_length),
                format_value(row.value),
                width = name_width
            ));
        }

        if ranked.len() > shown.len() {
            output.push_str(&format!("  ... and {} more\n", ranked.len() - shown.len()));
        }
        output.push_str(&"─".repeat(self.width));
        output
    }
}
