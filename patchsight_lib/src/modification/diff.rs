use serde::{Deserialize, Serialize};

/// Above this many comparison cells the middle section is shown as a plain
/// remove-then-add block instead of running the quadratic alignment.
const MAX_LCS_CELLS: usize = 4_000_000;
/// Replaced line pairs at least this similar get intraline markers.
const SIMILARITY_CUTOFF: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Context,
    /// Points at the changed characters of the line above it.
    Marker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffKind,
    pub text: String,
}

impl DiffLine {
    fn new(kind: DiffKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

enum Op<'a> {
    Equal(&'a str),
    Delete(&'a str),
    Insert(&'a str),
}

/// Line diff of `old` against `new` in reading order.
pub fn diff_lines(old: &str, new: &str) -> Vec<DiffLine> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();
    render_ops(&line_ops(&a, &b))
}

/// Escaped HTML, one line per diff line, using the `diff-added`,
/// `diff-removed` and `diff-changed-marker` span classes.
pub fn render_html(lines: &[DiffLine]) -> String {
    lines
        .iter()
        .map(|line| {
            let text = escape_html(&line.text);
            match line.kind {
                DiffKind::Added => format!("<span class=\"diff-added\">+ {text}</span>"),
                DiffKind::Removed => format!("<span class=\"diff-removed\">- {text}</span>"),
                DiffKind::Marker => {
                    format!("<span class=\"diff-changed-marker\">? {text}</span>")
                }
                DiffKind::Context => format!("  {text}"),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

fn line_ops<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Op<'a>> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut ops = Vec::with_capacity(a.len() + b.len());
    ops.extend(a[..prefix].iter().map(|&line| Op::Equal(line)));
    if a_mid.len().saturating_mul(b_mid.len()) <= MAX_LCS_CELLS {
        align(a_mid, b_mid, &mut ops);
    } else {
        ops.extend(a_mid.iter().map(|&line| Op::Delete(line)));
        ops.extend(b_mid.iter().map(|&line| Op::Insert(line)));
    }
    ops.extend(a[a.len() - suffix..].iter().map(|&line| Op::Equal(line)));
    ops
}

/// Longest-common-subsequence alignment; deletions come before insertions on ties.
fn align<'a>(a: &[&'a str], b: &[&'a str], ops: &mut Vec<Op<'a>>) {
    let (n, m) = (a.len(), b.len());
    let width = m + 1;
    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            ops.push(Op::Equal(a[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            ops.push(Op::Delete(a[i]));
            i += 1;
        } else {
            ops.push(Op::Insert(b[j]));
            j += 1;
        }
    }
    ops.extend(a[i..].iter().map(|&line| Op::Delete(line)));
    ops.extend(b[j..].iter().map(|&line| Op::Insert(line)));
}

fn render_ops(ops: &[Op<'_>]) -> Vec<DiffLine> {
    let mut out = Vec::with_capacity(ops.len());
    let mut deleted: Vec<&str> = Vec::new();
    let mut inserted: Vec<&str> = Vec::new();

    for op in ops {
        match op {
            Op::Delete(line) => deleted.push(*line),
            Op::Insert(line) => inserted.push(*line),
            Op::Equal(line) => {
                flush_change(&mut deleted, &mut inserted, &mut out);
                out.push(DiffLine::new(DiffKind::Context, *line));
            }
        }
    }
    flush_change(&mut deleted, &mut inserted, &mut out);
    out
}

fn flush_change(deleted: &mut Vec<&str>, inserted: &mut Vec<&str>, out: &mut Vec<DiffLine>) {
    let paired = deleted.len().max(inserted.len());
    for k in 0..paired {
        match (deleted.get(k), inserted.get(k)) {
            (Some(old), Some(new)) => {
                out.push(DiffLine::new(DiffKind::Removed, *old));
                let (old_marker, new_marker) = intraline_markers(old, new);
                if let Some(marker) = old_marker {
                    out.push(DiffLine::new(DiffKind::Marker, marker));
                }
                out.push(DiffLine::new(DiffKind::Added, *new));
                if let Some(marker) = new_marker {
                    out.push(DiffLine::new(DiffKind::Marker, marker));
                }
            }
            (Some(old), None) => out.push(DiffLine::new(DiffKind::Removed, *old)),
            (None, Some(new)) => out.push(DiffLine::new(DiffKind::Added, *new)),
            (None, None) => {}
        }
    }
    deleted.clear();
    inserted.clear();
}

/// Caret lines under the differing middle of two similar lines, `None` for
/// dissimilar pairs or for a side with nothing changed.
fn intraline_markers(old: &str, new: &str) -> (Option<String>, Option<String>) {
    let a: Vec<char> = old.chars().collect();
    let b: Vec<char> = new.chars().collect();
    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let total = a.len() + b.len();
    let ratio = 2.0 * (prefix + suffix) as f64 / total.max(1) as f64;
    if ratio < SIMILARITY_CUTOFF {
        return (None, None);
    }

    let old_changed = a.len() - prefix - suffix;
    let new_changed = b.len() - prefix - suffix;
    let marker = |changed: usize, other_changed: usize, solo: char| {
        (changed > 0).then(|| {
            let mark = if other_changed == 0 { solo } else { '^' };
            format!("{}{}", " ".repeat(prefix), mark.to_string().repeat(changed))
        })
    };
    (
        marker(old_changed, new_changed, '-'),
        marker(new_changed, old_changed, '+'),
    )
}
