//! Line-oriented diff
//!
//! Computes a human readable diff between two JSON renderings of a
//! definition. The diff is line-level: a longest-common-subsequence pass over
//! the lines, bounded by a wall-clock compute budget. When the budget runs
//! out the diff is rendered from the partial result: the rows computed so far
//! are backtracked as usual and the source lines the pass never reached
//! render as deletions. Each surviving line is prefixed with `" "`, `"-"` or
//! `"+"`; empty lines are skipped.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Result;

const COMPUTE_BUDGET: Duration = Duration::from_secs(2);

/// Render both values as pretty JSON and diff the lines from `src` to `dst`.
/// A missing source (resource does not exist remotely) diffs as all-insert.
pub fn json_diff<S: Serialize, D: Serialize>(src: Option<&S>, dst: &D) -> Result<String> {
    let src_json = match src {
        Some(value) => serde_json::to_string_pretty(value)?,
        None => String::new(),
    };
    let dst_json = serde_json::to_string_pretty(dst)?;
    Ok(line_oriented(&src_json, &dst_json))
}

/// Compute the line oriented diff from the source to the destination. Equal
/// inputs produce an empty diff; this is what the applier's plan/diff
/// consistency check relies on.
pub fn line_oriented(src: &str, dst: &str) -> String {
    if src == dst {
        return String::new();
    }
    let src_lines: Vec<&str> = src.lines().collect();
    let dst_lines: Vec<&str> = dst.lines().collect();

    // Common prefix and suffix are equal by construction; only the middle
    // needs the quadratic pass.
    let prefix = src_lines
        .iter()
        .zip(&dst_lines)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = src_lines[prefix..]
        .iter()
        .rev()
        .zip(dst_lines[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let src_mid = &src_lines[prefix..src_lines.len() - suffix];
    let dst_mid = &dst_lines[prefix..dst_lines.len() - suffix];

    let mut out = String::new();
    for line in &src_lines[..prefix] {
        push_line(&mut out, ' ', line);
    }

    let (completed, table) = lcs_table(src_mid, dst_mid, Instant::now() + COMPUTE_BUDGET);
    backtrack(&table, &src_mid[..completed], dst_mid, &mut out);
    // Source lines past the last completed row were never matched against
    // the destination and render as deletions.
    for line in &src_mid[completed..] {
        push_line(&mut out, '-', line);
    }

    for line in &src_lines[src_lines.len() - suffix..] {
        push_line(&mut out, ' ', line);
    }
    out
}

fn push_line(out: &mut String, prefix: char, line: &str) {
    if line.is_empty() {
        return;
    }
    out.push(prefix);
    out.push_str(line);
    out.push('\n');
}

/// Fill the LCS table row by row until done or the deadline passes. Returns
/// the number of source rows completed together with the table; rows beyond
/// the completed count are untouched.
fn lcs_table(src: &[&str], dst: &[&str], deadline: Instant) -> (usize, Vec<Vec<u32>>) {
    let mut table = vec![vec![0u32; dst.len() + 1]; src.len() + 1];
    for i in 1..=src.len() {
        if Instant::now() > deadline {
            return (i - 1, table);
        }
        for j in 1..=dst.len() {
            table[i][j] = if src[i - 1] == dst[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }
    (src.len(), table)
}

fn backtrack(table: &[Vec<u32>], src: &[&str], dst: &[&str], out: &mut String) {
    // Walk the table backwards collecting edits, then emit in order.
    let mut edits: Vec<(char, usize)> = Vec::new();
    let (mut i, mut j) = (src.len(), dst.len());
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && src[i - 1] == dst[j - 1] {
            edits.push((' ', i - 1));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            edits.push(('+', j - 1));
            j -= 1;
        } else {
            edits.push(('-', i - 1));
            i -= 1;
        }
    }
    edits.reverse();
    for (kind, index) in edits {
        let line = match kind {
            '+' => dst[index],
            _ => src[index],
        };
        push_line(out, kind, line);
    }
}
