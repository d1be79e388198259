//! Formatted terminal output for a fit.
//!
//! We keep formatting code in one place so the fitting code stays clean and
//! output changes are localized.

use crate::domain::FitConfig;
use crate::report::{PullRankings, compute_pulls, rank_pulls};

/// Format the full run summary (status + parameters + datasets).
pub fn format_run_summary(fit: &FitConfig) -> String {
    let mut out = String::new();
    let status = fit.status();

    out.push_str(&format!("=== hfit - {} ===\n", fit.name()));
    out.push_str(&format!(
        "Status: {} | method={} | calls={} | elapsed={:.3}s\n",
        if fit.is_complete() { "complete" } else { "INCOMPLETE" },
        fit.method().tag(),
        status.n_calls,
        status.elapsed.as_secs_f64(),
    ));
    out.push_str(&format!(
        "FCN={:.6} EDM={:.3e} free={}/{} cov_quality={}\n",
        status.fmin, status.edm, status.n_free, status.n_declared, status.cov_quality
    ));
    if let Some(err) = &status.error {
        out.push_str(&format!("Error: {err}\n"));
    }
    if status.point_errors > 0 {
        out.push_str(&format!("Evaluation problems: {}\n", status.point_errors));
    }

    out.push_str("\nParameters:\n");
    out.push_str(&format_parameters(fit));
    out.push_str("\nDatasets:\n");
    out.push_str(&format_datasets(fit));
    out
}

/// Parameter table: value, parabolic and asymmetric errors.
pub fn format_parameters(fit: &FitConfig) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:<16} {:>14} {:>12} {:>12} {:>12} {:<6}",
            "name", "value", "error", "minus", "plus", "state"
        ),
    );
    push_row(
        &mut out,
        format!("{:-<16} {:-<14} {:-<12} {:-<12} {:-<12} {:-<6}", "", "", "", "", "", ""),
    );

    for p in fit.parameters() {
        let r = p.result().copied().unwrap_or_default();
        let state = match (p.result(), p.is_fixed()) {
            (Some(r), _) if r.internal_index.is_none() => "fixed",
            (None, true) => "fixed",
            _ if p.bounds().is_some() => "bound",
            _ => "free",
        };
        push_row(
            &mut out,
            format!(
                "{:<16} {:>14.6} {:>12.4e} {:>12.4e} {:>12.4e} {:<6}",
                truncate(p.name(), 16),
                p.value(),
                r.error,
                r.minus_error,
                r.plus_error,
                state
            ),
        );
    }
    out
}

/// One line per dataset with its goodness of fit.
pub fn format_datasets(fit: &FitConfig) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:>3} {:<16} {:<16} {:>12} {:>8} {:>12} {:>6}",
            "#", "source", "method", "chi2", "n_used", "objective", "errors"
        ),
    );
    for (i, ds) in fit.datasets().iter().enumerate() {
        let s = ds.summary();
        let source = if ds.is_enabled() {
            truncate(ds.source(), 16)
        } else {
            truncate(&format!("({})", ds.source()), 16)
        };
        push_row(
            &mut out,
            format!(
                "{:>3} {:<16} {:<16} {:>12.4} {:>8} {:>12.4} {:>6}",
                i,
                source,
                ds.effective_method(fit.method()).tag(),
                s.chi2,
                s.n_used,
                s.objective,
                s.n_errors
            ),
        );
    }
    out
}

/// Largest pulls of one dataset, both sides.
pub fn format_pulls(fit: &FitConfig, index: usize, top_n: usize) -> String {
    let Some(ds) = fit.dataset(index) else {
        return String::new();
    };
    let rankings = rank_pulls(&compute_pulls(ds), top_n);
    let mut out = String::new();
    out.push_str(&format!("Dataset {index} ({}): data above fit\n", ds.source()));
    out.push_str(&format_pull_table(&rankings, true));
    out.push('\n');
    out.push_str(&format!("Dataset {index} ({}): data below fit\n", ds.source()));
    out.push_str(&format_pull_table(&rankings, false));
    out
}

fn format_pull_table(rankings: &PullRankings, high: bool) -> String {
    let rows = if high { &rankings.high } else { &rankings.low };
    let mut out = String::new();
    push_row(
        &mut out,
        format!("{:>6} {:>12} {:>12} {:>12} {:>8}", "point", "x", "obs", "fit", "pull"),
    );
    for r in rows {
        push_row(
            &mut out,
            format!(
                "{:>6} {:>12.4} {:>12.4} {:>12.4} {:>8.2}",
                r.index, r.coords[0], r.obs, r.fit, r.pull
            ),
        );
    }
    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_parameters_and_state() {
        let mut fit = FitConfig::new("demo");
        fit.add_parameter("Mean", 1.25, 0.1).unwrap();
        fit.add_parameter("width", 2.0, 0.1).unwrap();
        fit.fix("width").unwrap();
        fit.set_bounds("Mean", 0.0, 5.0).unwrap();

        let text = format_run_summary(&fit);
        assert!(text.contains("=== hfit - demo ==="));
        assert!(text.contains("INCOMPLETE"));
        let mean = text.lines().find(|l| l.starts_with("Mean")).unwrap();
        assert!(mean.contains("1.250000"));
        assert!(mean.ends_with("bound"));
        let width = text.lines().find(|l| l.starts_with("width")).unwrap();
        assert!(width.ends_with("fixed"));
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
