//! Context optimization for subtask prompts
//!
//! Pure functions that squeeze chat summaries and prior agent output into a
//! bounded task description. All lengths are measured in characters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Below this budget there is no room for markers; text is cut hard
const MIN_STRUCTURED_BUDGET: usize = 20;
/// Upper bound on the verbatim prefix/suffix kept by the density path
const MAX_EDGE_CHARS: usize = 200;
const MAX_CHUNK_CHARS: usize = 120;
const DENSITY_MARKER: &str = "\n[...]\n";
/// Minimum share of lines that must match one structural pattern
const STRUCTURE_DOMINANCE: f64 = 0.6;
const MIN_STRUCTURAL_UNITS: usize = 4;

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•+]|\d+[.)])\s+\S").expect("valid list regex"));
static KEY_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z_][\w .\-]{0,40}\s*[:=]\s*\S").expect("valid key-value regex"));
static JSON_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(?:[\{\[]|"[^"]+"\s*:)"#).expect("valid json regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Structure {
    Json,
    KeyValue,
    ListItems,
}

/// Rough token estimate (about four characters per token)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Shrink `text` to at most `max_length` characters.
///
/// Text that already fits is returned unchanged. Text made mostly of repeated
/// structural units (list items, `key: value` lines, JSON lines) keeps the
/// first and last unit plus as many middle units as fit, with an
/// "N similar items omitted" marker. Anything else keeps a verbatim prefix
/// and suffix and fills the middle with the most information-dense chunks.
pub fn optimize_context_block(text: &str, max_length: usize) -> String {
    let length = char_len(text);
    if length <= max_length {
        return text.to_string();
    }
    if max_length < MIN_STRUCTURED_BUDGET {
        return text.chars().take(max_length).collect();
    }

    if let Some(structure) = dominant_structure(text) {
        if let Some(compressed) = compress_structural(text, max_length) {
            log::debug!(
                "[CONTEXT] Compressed {:?} block from {} to {} chars",
                structure,
                length,
                char_len(&compressed)
            );
            return compressed;
        }
    }

    compress_by_density(text, max_length)
}

/// Build a subtask prompt: the subtask verbatim, then a compressed context
/// section with the conversation summary and earlier agents' outputs.
pub fn build_task_description(
    subtask: &str,
    history_summary: &str,
    prior_outputs: &[(String, String)],
    max_length: usize,
) -> String {
    let header = format!("Task: {}", subtask.trim());

    let mut context = String::new();
    if !history_summary.trim().is_empty() {
        context.push_str("Conversation context: ");
        context.push_str(history_summary.trim());
    }
    if !prior_outputs.is_empty() {
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str("Results from teammates so far:");
        for (agent, output) in prior_outputs {
            context.push_str(&format!("\n- {}: {}", agent, output.trim()));
        }
    }

    if context.is_empty() {
        return header;
    }

    let separator = "\n\n";
    let budget = max_length.saturating_sub(char_len(&header) + separator.len());
    if budget < MIN_STRUCTURED_BUDGET {
        return header;
    }
    format!("{}{}{}", header, separator, optimize_context_block(&context, budget))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn non_empty_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !l.trim().is_empty()).collect()
}

fn dominant_structure(text: &str) -> Option<Structure> {
    let lines = non_empty_lines(text);
    if lines.len() < MIN_STRUCTURAL_UNITS {
        return None;
    }

    let count = |re: &Regex| lines.iter().filter(|l| re.is_match(l)).count();
    let candidates = [
        (Structure::ListItems, count(&*LIST_ITEM)),
        (Structure::Json, count(&*JSON_LIKE)),
        (Structure::KeyValue, count(&*KEY_VALUE)),
    ];

    candidates
        .into_iter()
        .filter(|(_, matches)| *matches as f64 / lines.len() as f64 >= STRUCTURE_DOMINANCE)
        .max_by_key(|(_, matches)| *matches)
        .map(|(structure, _)| structure)
}

fn omission_marker(omitted: usize) -> String {
    format!("... [{} similar items omitted] ...", omitted)
}

/// First and last unit, middle units from the front while they fit
fn compress_structural(text: &str, max_length: usize) -> Option<String> {
    let units = non_empty_lines(text);
    let (first, rest) = units.split_first()?;
    let (last, middle) = rest.split_last()?;

    let assemble = |kept: usize| -> String {
        let mut parts: Vec<String> = Vec::with_capacity(kept + 3);
        parts.push(first.to_string());
        parts.extend(middle[..kept].iter().map(|u| u.to_string()));
        if kept < middle.len() {
            parts.push(omission_marker(middle.len() - kept));
        }
        parts.push(last.to_string());
        parts.join("\n")
    };

    let mut kept = 0;
    let mut best = assemble(0);
    if char_len(&best) > max_length {
        return None;
    }
    while kept < middle.len() {
        let candidate = assemble(kept + 1);
        if char_len(&candidate) > max_length {
            break;
        }
        kept += 1;
        best = candidate;
    }
    Some(best)
}

/// Density score: Σ -f·√f over character frequencies. Chunks with more
/// distinct characters score higher (closer to zero).
fn density_score(chunk: &[char]) -> f64 {
    if chunk.is_empty() {
        return f64::MIN;
    }
    let mut counts: std::collections::HashMap<char, usize> = std::collections::HashMap::new();
    for c in chunk {
        *counts.entry(*c).or_insert(0) += 1;
    }
    let total = chunk.len() as f64;
    counts
        .values()
        .map(|&n| {
            let f = n as f64 / total;
            -f * f.sqrt()
        })
        .sum()
}

/// Verbatim prefix and suffix, middle filled with the densest chunks
fn compress_by_density(text: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let marker_len = char_len(DENSITY_MARKER);
    let edge = (max_length.saturating_sub(marker_len) / 3).min(MAX_EDGE_CHARS);

    let prefix: String = chars[..edge].iter().collect();
    let suffix: String = chars[chars.len() - edge..].iter().collect();
    let middle = &chars[edge..chars.len() - edge];

    let room = max_length.saturating_sub(2 * edge);
    let chunk_size = (room / 4).clamp(8, MAX_CHUNK_CHARS);
    let chunks: Vec<&[char]> = middle.chunks(chunk_size).collect();

    let assemble = |kept: &[bool]| -> String {
        let mut out = prefix.clone();
        let mut in_gap = false;
        for (chunk, keep) in chunks.iter().zip(kept) {
            if *keep {
                if in_gap {
                    out.push_str(DENSITY_MARKER);
                    in_gap = false;
                }
                out.extend(chunk.iter());
            } else {
                in_gap = true;
            }
        }
        if in_gap {
            out.push_str(DENSITY_MARKER);
        }
        out.push_str(&suffix);
        out
    };

    let mut order: Vec<usize> = (0..chunks.len()).collect();
    order.sort_by(|&a, &b| {
        density_score(chunks[b])
            .partial_cmp(&density_score(chunks[a]))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut kept = vec![false; chunks.len()];
    for index in order {
        kept[index] = true;
        if char_len(&assemble(&kept)) > max_length {
            kept[index] = false;
        }
    }

    assemble(&kept)
}
