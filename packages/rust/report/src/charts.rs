//! 2×2 SVG figure of an analysis.
//!
//! Panels: bucket counts, a log-scale histogram of the differences, Source B
//! against Source A values, and the wallets with the most mismatching days.

use std::fmt::{self, Write};

use perpcheck_shared::analysis::{Analysis, BUCKETS, View};

const WIDTH: f64 = 1600.0;
const HEIGHT: f64 = 1200.0;
const TITLE_HEIGHT: f64 = 60.0;

/// Bins of the difference histogram.
pub const HISTOGRAM_BINS: usize = 100;
/// Wallets in the mismatch-days panel.
pub const CHART_ADDRESSES: usize = 30;
/// Percentage marked on the histogram.
const THRESHOLD_PCT: f64 = 0.5;

const OK_COLOR: &str = "#2ecc71";
const MISMATCH_COLOR: &str = "#e74c3c";
const HIST_COLOR: &str = "#3498db";

/// Plot area of one panel, in canvas pixels.
#[derive(Debug, Clone, Copy)]
struct Panel {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

impl Panel {
    /// Plot area of grid cell (`row`, `col`) with room for axis labels.
    fn cell(row: usize, col: usize) -> Self {
        let cell_w = WIDTH / 2.0;
        let cell_h = (HEIGHT - TITLE_HEIGHT) / 2.0;
        Self {
            x: col as f64 * cell_w + 150.0,
            y: TITLE_HEIGHT + row as f64 * cell_h + 50.0,
            w: cell_w - 200.0,
            h: cell_h - 120.0,
        }
    }

    fn bottom(&self) -> f64 {
        self.y + self.h
    }
}

/// Render the figure as a standalone SVG document.
pub fn render_charts_svg(analysis: &Analysis) -> String {
    let mut svg = String::new();
    // writing into a String cannot fail
    let _ = write_charts(&mut svg, analysis);
    svg
}

fn write_charts(out: &mut String, analysis: &Analysis) -> fmt::Result {
    let title = match analysis.view {
        View::Raw => "Artemis vs Hyperliquid: Perp Account Value Comparison",
        View::Normalized => "Artemis vs Hyperliquid (Normalized): Perp Account Value Comparison",
    };
    writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="12">"#
    )?;
    writeln!(out, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(
        out,
        r#"<text x="{}" y="36" text-anchor="middle" font-size="20">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    )?;

    write_bucket_panel(out, analysis, Panel::cell(0, 0))?;
    write_histogram_panel(out, analysis, Panel::cell(0, 1))?;
    write_scatter_panel(out, analysis, Panel::cell(1, 0))?;
    write_address_panel(out, analysis, Panel::cell(1, 1))?;

    writeln!(out, "</svg>")
}

fn write_bucket_panel(out: &mut String, analysis: &Analysis, panel: Panel) -> fmt::Result {
    let title = match analysis.view {
        View::Raw => "Distribution of Diff %",
        View::Normalized => "Distribution of Diff % (Normalized)",
    };
    write_frame(out, panel, title, "Number of address-day pairs", None)?;

    let rows: Vec<(&str, usize, &str)> = BUCKETS
        .iter()
        .zip(analysis.bucket_counts)
        .map(|(b, count)| (b.label, count, b.color))
        .collect();
    write_horizontal_bars(out, panel, &rows, true)
}

fn write_address_panel(out: &mut String, analysis: &Analysis, panel: Panel) -> fmt::Result {
    let title = match analysis.view {
        View::Raw => "Top 30 addresses by mismatch count",
        View::Normalized => "Top 30 addresses by mismatch count (Normalized)",
    };
    write_frame(out, panel, title, "Mismatch days", None)?;

    let labels: Vec<String> = analysis
        .worst_addresses(CHART_ADDRESSES)
        .iter()
        .map(|a| a.address.short(8))
        .collect();
    let rows: Vec<(&str, usize, &str)> = analysis
        .worst_addresses(CHART_ADDRESSES)
        .iter()
        .zip(&labels)
        .map(|(a, label)| (label.as_str(), a.mismatch_days, MISMATCH_COLOR))
        .collect();
    write_horizontal_bars(out, panel, &rows, false)
}

/// Bars top to bottom in `rows` order, scaled to the largest count.
fn write_horizontal_bars(
    out: &mut String,
    panel: Panel,
    rows: &[(&str, usize, &str)],
    show_counts: bool,
) -> fmt::Result {
    if rows.is_empty() {
        return write_empty_note(out, panel);
    }
    let max = rows.iter().map(|r| r.1).max().unwrap_or(0).max(1) as f64;
    let slot = panel.h / rows.len() as f64;
    let bar_h = slot * 0.8;

    for (i, (label, count, color)) in rows.iter().enumerate() {
        let y = panel.y + i as f64 * slot + (slot - bar_h) / 2.0;
        let w = *count as f64 / max * panel.w;
        writeln!(
            out,
            r#"<rect x="{:.1}" y="{y:.1}" width="{w:.1}" height="{bar_h:.1}" fill="{color}"/>"#,
            panel.x
        )?;
        writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end" dominant-baseline="middle">{}</text>"#,
            panel.x - 6.0,
            y + bar_h / 2.0,
            escape(label)
        )?;
        if show_counts && *count > 0 {
            writeln!(
                out,
                r#"<text x="{:.1}" y="{:.1}" dominant-baseline="middle" font-size="10">{}</text>"#,
                panel.x + w + 4.0,
                y + bar_h / 2.0,
                crate::tables::group_count(*count)
            )?;
        }
    }
    Ok(())
}

/// Bin counts of `values` over `[min, max]`; the last bin is closed.
fn histogram(values: &[f64], bins: usize) -> Option<(f64, f64, Vec<usize>)> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !min.is_finite() || !max.is_finite() || bins == 0 {
        return None;
    }
    let span = if max > min { max - min } else { 1.0 };
    let mut counts = vec![0usize; bins];
    for v in values {
        let i = (((v - min) / span) * bins as f64) as usize;
        counts[i.min(bins - 1)] += 1;
    }
    Some((min, min + span, counts))
}

fn write_histogram_panel(out: &mut String, analysis: &Analysis, panel: Panel) -> fmt::Result {
    let title = match analysis.view {
        View::Raw => "Histogram of Diff % (all pairs)",
        View::Normalized => "Histogram of Diff % (Normalized)",
    };
    write_frame(out, panel, title, "Diff %", Some("Count (log)"))?;

    let pcts: Vec<f64> = analysis.points.iter().map(|p| p.pct).collect();
    let Some((lo, hi, counts)) = histogram(&pcts, HISTOGRAM_BINS) else {
        return write_empty_note(out, panel);
    };

    let peak = counts.iter().copied().max().unwrap_or(1).max(1) as f64;
    // one extra decade so single-count bins stay visible
    let decades = peak.log10() + 1.0;
    let bin_w = panel.w / counts.len() as f64;
    for (i, count) in counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        let h = ((*count as f64).log10() + 1.0) / decades * panel.h;
        writeln!(
            out,
            r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{h:.2}" fill="{HIST_COLOR}" stroke="white" stroke-width="0.3"/>"#,
            panel.x + i as f64 * bin_w,
            panel.bottom() - h,
            bin_w
        )?;
    }

    write_x_ticks(out, panel, lo, hi, |v| format!("{v:.0}"))?;

    if (lo..=hi).contains(&THRESHOLD_PCT) {
        let x = panel.x + (THRESHOLD_PCT - lo) / (hi - lo) * panel.w;
        writeln!(
            out,
            r#"<line x1="{x:.2}" y1="{:.1}" x2="{x:.2}" y2="{:.1}" stroke="green" stroke-dasharray="6,4"/>"#,
            panel.y,
            panel.bottom()
        )?;
        writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end" fill="green">{THRESHOLD_PCT}% threshold</text>"#,
            panel.x + panel.w - 4.0,
            panel.y + 14.0
        )?;
    }
    Ok(())
}

fn write_scatter_panel(out: &mut String, analysis: &Analysis, panel: Panel) -> fmt::Result {
    let (title, x_label) = match analysis.view {
        View::Raw => (
            "Artemis vs Hyperliquid (green=OK, red=mismatch)",
            "Hyperliquid value ($)",
        ),
        View::Normalized => (
            "Artemis vs HL Normalized (green=OK, red=mismatch)",
            "Hyperliquid Normalized ($)",
        ),
    };
    write_frame(out, panel, title, x_label, Some("Artemis value ($)"))?;

    if analysis.points.is_empty() {
        return write_empty_note(out, panel);
    }
    let values = analysis
        .points
        .iter()
        .flat_map(|p| [p.artemis, p.hyperliquid]);
    let lo = values.clone().fold(f64::INFINITY, f64::min);
    let hi = values.fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };
    let sx = |v: f64| panel.x + (v - lo) / span * panel.w;
    let sy = |v: f64| panel.bottom() - (v - lo) / span * panel.h;

    for p in &analysis.points {
        let color = if p.matched { OK_COLOR } else { MISMATCH_COLOR };
        writeln!(
            out,
            r#"<circle cx="{:.2}" cy="{:.2}" r="2" fill="{color}" fill-opacity="0.15"/>"#,
            sx(p.hyperliquid),
            sy(p.artemis)
        )?;
    }
    writeln!(
        out,
        r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="black" stroke-opacity="0.5" stroke-dasharray="6,4"/>"#,
        sx(lo),
        sy(lo),
        sx(lo + span),
        sy(lo + span)
    )?;

    write_x_ticks(out, panel, lo, lo + span, millions)?;
    for i in 0..=4 {
        let v = lo + span * i as f64 / 4.0;
        writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end" font-size="10">{}</text>"#,
            panel.x - 4.0,
            sy(v),
            millions(v)
        )?;
    }
    Ok(())
}

fn millions(v: f64) -> String {
    format!("${:.1}M", v / 1e6)
}

fn write_x_ticks(
    out: &mut String,
    panel: Panel,
    lo: f64,
    hi: f64,
    label: impl Fn(f64) -> String,
) -> fmt::Result {
    for i in 0..=4 {
        let v = lo + (hi - lo) * i as f64 / 4.0;
        writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="10">{}</text>"#,
            panel.x + panel.w * i as f64 / 4.0,
            panel.bottom() + 16.0,
            escape(&label(v))
        )?;
    }
    Ok(())
}

/// Axes, panel title and axis labels.
fn write_frame(
    out: &mut String,
    panel: Panel,
    title: &str,
    x_label: &str,
    y_label: Option<&str>,
) -> fmt::Result {
    writeln!(
        out,
        r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="none" stroke="#888"/>"##,
        panel.x, panel.y, panel.w, panel.h
    )?;
    writeln!(
        out,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="14">{}</text>"#,
        panel.x + panel.w / 2.0,
        panel.y - 14.0,
        escape(title)
    )?;
    writeln!(
        out,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
        panel.x + panel.w / 2.0,
        panel.bottom() + 36.0,
        escape(x_label)
    )?;
    if let Some(y_label) = y_label {
        let (x, y) = (panel.x - 60.0, panel.y + panel.h / 2.0);
        writeln!(
            out,
            r#"<text x="{x:.1}" y="{y:.1}" text-anchor="middle" transform="rotate(-90 {x:.1} {y:.1})">{}</text>"#,
            escape(y_label)
        )?;
    }
    Ok(())
}

fn write_empty_note(out: &mut String, panel: Panel) -> fmt::Result {
    writeln!(
        out,
        r##"<text x="{:.1}" y="{:.1}" text-anchor="middle" fill="#888">no compared pairs</text>"##,
        panel.x + panel.w / 2.0,
        panel.y + panel.h / 2.0
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use perpcheck_shared::Address;
    use perpcheck_shared::analysis::{AddressMismatches, ComparedPoint};

    use super::*;

    fn point(pct: f64, matched: bool) -> ComparedPoint {
        ComparedPoint {
            address: Address::parse("0x00000000000000000000000000000000000000aa").unwrap(),
            date: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            artemis: 1000.0,
            hyperliquid: 999.0,
            hyperliquid_raw: 999.0,
            flow_adjustment: 0.0,
            events_in_gap: 0,
            artemis_timestamp: Some(1),
            hyperliquid_timestamp: Some(0),
            pct,
            abs: Some(1.0),
            matched,
            pct_before: Some(pct),
            matched_before: Some(matched),
        }
    }

    fn analysis(points: Vec<ComparedPoint>) -> Analysis {
        let mut bucket_counts = [0; BUCKETS.len()];
        for p in &points {
            if let Some(i) = perpcheck_shared::analysis::bucket_of(p.pct) {
                bucket_counts[i] += 1;
            }
        }
        let mismatches = if points.iter().any(|p| !p.matched) {
            vec![AddressMismatches {
                address: points[0].address.clone(),
                mismatch_days: points.iter().filter(|p| !p.matched).count(),
                avg_pct: 50.0,
            }]
        } else {
            Vec::new()
        };
        Analysis {
            view: View::Raw,
            generated_at: Utc::now(),
            points,
            bucket_counts,
            missing: 0,
            mismatches,
        }
    }

    #[test]
    fn histogram_bins_cover_the_range() {
        let (lo, hi, counts) = histogram(&[0.0, 0.1, 50.0, 100.0], 100).unwrap();
        assert_eq!((lo, hi), (0.0, 100.0));
        assert_eq!(counts.len(), 100);
        assert_eq!(counts.iter().sum::<usize>(), 4);
        assert_eq!(counts[0], 2);
        assert_eq!(counts[99], 1);

        let (_, _, single) = histogram(&[3.0, 3.0], 10).unwrap();
        assert_eq!(single[0], 2);
        assert!(histogram(&[], 10).is_none());
    }

    #[test]
    fn svg_has_four_panels_and_escaped_labels() {
        let svg = render_charts_svg(&analysis(vec![point(0.1, true), point(99.9, false)]));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("Distribution of Diff %"));
        assert!(svg.contains("Histogram of Diff % (all pairs)"));
        assert!(svg.contains("green=OK, red=mismatch"));
        assert!(svg.contains("Top 30 addresses by mismatch count"));
        assert!(svg.contains("OK (&lt; 0.5%)"));
        assert!(!svg.contains("(< 0.5%)"));
        assert_eq!(svg.matches("<circle").count(), 2);
        assert!(svg.contains("0.5% threshold"));
        assert!(svg.contains("0x000000…"));
    }

    #[test]
    fn empty_analysis_still_renders() {
        let svg = render_charts_svg(&analysis(Vec::new()));
        assert!(svg.contains("no compared pairs"));
        assert!(!svg.contains("<circle"));
    }
}
