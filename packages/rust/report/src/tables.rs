//! Fixed-width text tables.

use std::fmt::{self, Write};

use perpcheck_shared::analysis::{Analysis, BUCKETS, View};

/// Table width of the distribution and worst-point tables.
const RULE: usize = 65;

/// Rows in the worst-points and worst-addresses tables.
pub const TABLE_ROWS: usize = 20;

/// All tables of an analysis, in reading order.
pub fn render_text_report(analysis: &Analysis) -> String {
    let mut out = String::new();
    out.push_str(&render_distribution(analysis));
    if let Some(improvement) = render_improvement(analysis) {
        out.push('\n');
        out.push_str(&improvement);
    }
    out.push('\n');
    out.push_str(&render_worst_points(analysis, TABLE_ROWS));
    out.push('\n');
    out.push_str(&render_worst_addresses(analysis, TABLE_ROWS));
    out
}

/// Bucket table with count, share and a bar of one block per 2 %.
pub fn render_distribution(analysis: &Analysis) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write_distribution(&mut out, analysis);
    out
}

fn write_distribution(out: &mut String, analysis: &Analysis) -> fmt::Result {
    let heavy = "=".repeat(RULE);
    let light = "-".repeat(RULE);
    writeln!(out, "{heavy}")?;
    writeln!(out, "MISMATCH DISTRIBUTION{}", title_suffix(analysis.view))?;
    writeln!(
        out,
        "  Total compared pairs : {}",
        group_count(analysis.total_compared())
    )?;
    writeln!(out, "  Missing (one side)   : {}", group_count(analysis.missing))?;
    writeln!(out, "{heavy}")?;
    writeln!(out, "{:<20} {:>8} {:>8}  Bar", "Bucket", "Count", "%")?;
    writeln!(out, "{light}")?;
    for (i, bucket) in BUCKETS.iter().enumerate() {
        let share = analysis.bucket_share(i);
        let bar = "█".repeat((share / 2.0) as usize);
        writeln!(
            out,
            "{:<20} {:>8} {:>7.1}%  {bar}",
            bucket.label,
            group_count(analysis.bucket_counts[i]),
            share
        )?;
    }
    writeln!(out, "{light}")
}

/// The `n` largest single-day differences.
pub fn render_worst_points(analysis: &Analysis, n: usize) -> String {
    let mut out = String::new();
    let _ = write_worst_points(&mut out, analysis, n);
    out
}

fn write_worst_points(out: &mut String, analysis: &Analysis, n: usize) -> fmt::Result {
    let normalized = analysis.view == View::Normalized;
    writeln!(
        out,
        "TOP {n} WORST SINGLE-DAY MISMATCHES{}",
        title_suffix(analysis.view)
    )?;
    if normalized {
        writeln!(
            out,
            "{:<14} {:<12} {:>14} {:>14} {:>12} {:>8}",
            "Address", "Date", "Artemis", "HL Norm", "Adj", "Diff%"
        )?;
        writeln!(out, "{}", "-".repeat(78))?;
    } else {
        writeln!(
            out,
            "{:<14} {:<12} {:>14} {:>14} {:>8}",
            "Address", "Date", "Artemis", "Hyperliquid", "Diff%"
        )?;
        writeln!(out, "{}", "-".repeat(RULE))?;
    }

    for p in analysis.worst_points(n) {
        let address = p.address.short(12);
        let date = p.date.to_string();
        if normalized {
            let adjustment = if p.flow_adjustment != 0.0 {
                group_signed(p.flow_adjustment)
            } else {
                "0".to_string()
            };
            writeln!(
                out,
                "{address} {date:<12} {:>14} {:>14} {adjustment:>12} {:>7.1}%",
                group_amount(p.artemis),
                group_amount(p.hyperliquid),
                p.pct
            )?;
        } else {
            writeln!(
                out,
                "{address} {date:<12} {:>14} {:>14} {:>7.1}%",
                group_amount(p.artemis),
                group_amount(p.hyperliquid),
                p.pct
            )?;
        }
    }
    Ok(())
}

/// The `n` wallets with the most mismatching days.
pub fn render_worst_addresses(analysis: &Analysis, n: usize) -> String {
    let mut out = String::new();
    let _ = write_worst_addresses(&mut out, analysis, n);
    out
}

fn write_worst_addresses(out: &mut String, analysis: &Analysis, n: usize) -> fmt::Result {
    writeln!(
        out,
        "TOP {n} ADDRESSES BY MISMATCH DAY COUNT{}",
        title_suffix(analysis.view)
    )?;
    writeln!(out, "{:<44} {:>14} {:>10}", "Address", "Mismatch days", "Avg pct%")?;
    writeln!(out, "{}", "-".repeat(70))?;
    for entry in analysis.worst_addresses(n) {
        writeln!(
            out,
            "{:<44} {:>14} {:>9.1}%",
            entry.address.as_str(),
            entry.mismatch_days,
            entry.avg_pct
        )?;
    }
    Ok(())
}

/// Fixed and worsened pairs; `None` for the raw view.
pub fn render_improvement(analysis: &Analysis) -> Option<String> {
    let improvement = analysis.improvement()?;
    Some(format!(
        "  Pairs fixed by normalization  : {}\n  Pairs worsened                : {}\n",
        group_count(improvement.fixed),
        group_count(improvement.worsened)
    ))
}

fn title_suffix(view: View) -> &'static str {
    match view {
        View::Raw => "",
        View::Normalized => " (NORMALIZED)",
    }
}

fn group_digits(digits: &str) -> String {
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// `1234567` as `1,234,567`.
pub fn group_count(n: usize) -> String {
    group_digits(&n.to_string())
}

/// A dollar amount rounded to whole units with thousands separators.
pub fn group_amount(value: f64) -> String {
    let rounded = value.round();
    let digits = group_digits(&format!("{:.0}", rounded.abs()));
    if rounded < 0.0 {
        format!("-{digits}")
    } else {
        digits
    }
}

/// Like [`group_amount`] with an explicit `+` for non-negative values.
fn group_signed(value: f64) -> String {
    if value.round() < 0.0 {
        group_amount(value)
    } else {
        format!("+{}", group_amount(value))
    }
}
