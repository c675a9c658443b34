use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Whole-word rewrites for surnames that show up spelled several ways across
/// exports. This is an allow-list, not a similarity rule.
const ALIASES: &[(&str, &str)] = &[("D SILVA", "DSILVA")];

/// Cell contents that spreadsheet exports write for an empty value.
const MISSING_MARKERS: &[&str] = &["NAN", "NONE", "NULL"];

/// Decomposes `value` and drops combining marks, so `MARÍA` becomes `MARIA`.
pub fn fold_accents(value: &str) -> String {
    value.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Maps a free-text student name to the key used to join and deduplicate
/// students across files. Total: bad input yields an empty string.
pub fn normalize(raw_name: &str) -> String {
    let upper = fold_accents(raw_name).to_uppercase();
    let replaced: String = upper
        .chars()
        .map(|c| {
            if c.is_ascii_uppercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");

    if MISSING_MARKERS.contains(&collapsed.as_str()) {
        return String::new();
    }

    apply_aliases(&collapsed)
}

/// `normalize` for cells that may be absent altogether.
pub fn normalize_opt(raw_name: Option<&str>) -> String {
    raw_name.map(normalize).unwrap_or_default()
}

fn apply_aliases(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    let mut padded = format!(" {name} ");
    for (from, to) in ALIASES {
        let needle = format!(" {from} ");
        let replacement = format!(" {to} ");
        while padded.contains(&needle) {
            padded = padded.replace(&needle, &replacement);
        }
    }
    padded.trim().to_string()
}
