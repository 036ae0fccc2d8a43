//! Self-contained HTML report generation.
//!
//! Renders the formatted matrices as heatmap tables with an inline color
//! scale and the metric distributions as inline SVG histograms. The report
//! is a single file with no external assets, written under the
//! visualization directory.

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;

use crate::collect::format::FormattedData;
use crate::collect::matrix::{Histogram, Matrix};

const REPORT_FILE: &str = "network_benchmark_report.html";

/// Write the HTML report; returns the report path
pub fn generate_html_report(data: &FormattedData, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).wrap_err_with(|| {
        format!(
            "Failed to create visualization directory '{}'",
            output_dir.display()
        )
    })?;

    let path = output_dir.join(REPORT_FILE);
    fs::write(&path, render_report(data))
        .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
    info!("HTML report saved to {:?}", path);
    Ok(path)
}

fn render_report(data: &FormattedData) -> String {
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<title>Network Benchmark Report</title>\n");
    html.push_str("<style>\n");
    html.push_str(
        "body { font-family: -apple-system, sans-serif; margin: 2em; color: #222; }\n\
         h1 { border-bottom: 2px solid #336699; padding-bottom: 0.3em; }\n\
         table { border-collapse: collapse; margin: 1em 0; }\n\
         th, td { border: 1px solid #ccc; padding: 6px 10px; text-align: right; }\n\
         th { background: #f0f4f8; }\n\
         td.empty { background: #fafafa; color: #aaa; }\n\
         .caption { color: #666; font-size: 0.9em; }\n",
    );
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str("<h1>Network Benchmark Report</h1>\n");
    html.push_str(&format!(
        "<p class=\"caption\">Generated {}</p>\n",
        data.timestamp
    ));

    // Higher latency and loss are worse, higher bandwidth is better
    let sections: [(&str, &str, &Option<Matrix>, &Option<Histogram>, bool); 4] = [
        (
            "Latency",
            "Average round-trip time in ms, source row to target column.",
            &data.latency_matrix,
            &data.latency_histogram,
            true,
        ),
        (
            "TCP Bandwidth",
            "Throughput in Mbps, source row to target column.",
            &data.p2p_bandwidth_matrix,
            &data.p2p_bandwidth_histogram,
            false,
        ),
        (
            "UDP Bandwidth",
            "Throughput in Mbps, server row to client column.",
            &data.udp_bandwidth_matrix,
            &data.udp_bandwidth_histogram,
            false,
        ),
        (
            "UDP Packet Loss",
            "Loss in percent, server row to client column.",
            &data.udp_loss_matrix,
            &None,
            true,
        ),
    ];

    for (title, caption, matrix, histogram, high_is_bad) in sections {
        html.push_str(&format!("<h2>{}</h2>\n", title));
        let Some(matrix) = matrix else {
            html.push_str("<p>No data.</p>\n");
            continue;
        };
        html.push_str(&format!("<p class=\"caption\">{}</p>\n", caption));
        html.push_str(&heatmap_table(matrix, high_is_bad));
        if let Some(histogram) = histogram {
            html.push_str(&svg_histogram(histogram));
        }
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Render a matrix as a table with a green-to-red background scale
fn heatmap_table(matrix: &Matrix, high_is_bad: bool) -> String {
    let finite = matrix.finite_values();
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut html = String::from("<table>\n<tr><th></th>");
    for label in &matrix.labels {
        html.push_str(&format!("<th>{}</th>", label));
    }
    html.push_str("</tr>\n");

    for (label, row) in matrix.labels.iter().zip(&matrix.values) {
        html.push_str(&format!("<tr><th>{}</th>", label));
        for value in row {
            if value.is_finite() {
                html.push_str(&format!(
                    "<td style=\"background:{}\">{:.2}</td>",
                    heat_color(*value, min, max, high_is_bad),
                    value
                ));
            } else {
                html.push_str("<td class=\"empty\">&ndash;</td>");
            }
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</table>\n");
    html
}

/// Interpolate green (good) to red (bad) for a value within [min, max]
fn heat_color(value: f64, min: f64, max: f64, high_is_bad: bool) -> String {
    let t = if max > min {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        0.5
    };
    let badness = if high_is_bad { t } else { 1.0 - t };
    let red = (120.0 + 135.0 * badness) as u8;
    let green = (220.0 - 100.0 * badness) as u8;
    format!("rgb({},{},140)", red, green)
}

/// Render a histogram as a small inline SVG bar chart
fn svg_histogram(histogram: &Histogram) -> String {
    const WIDTH: f64 = 440.0;
    const HEIGHT: f64 = 140.0;
    const BASE: f64 = 120.0;

    let max_count = histogram.counts.iter().copied().max().unwrap_or(1).max(1);
    let bar_width = WIDTH / histogram.counts.len() as f64;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" role=\"img\">\n",
        WIDTH as u32, HEIGHT as u32
    );
    for (i, count) in histogram.counts.iter().enumerate() {
        let bar_height = BASE * (*count as f64) / max_count as f64;
        let x = bar_width * i as f64;
        svg.push_str(&format!(
            "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"#336699\"><title>{:.2}: {}</title></rect>\n",
            x,
            BASE - bar_height,
            bar_width - 2.0,
            bar_height,
            histogram.bin_centers[i],
            count
        ));
    }
    svg.push_str("</svg>\n");
    svg
}
