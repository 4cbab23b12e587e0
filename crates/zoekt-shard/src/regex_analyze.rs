//! Regex analysis: derive literal substrings that every match of a regex
//! must contain, so a regexp query can be pruned with the trigram index
//! before the expensive regex scan.

use std::collections::BTreeSet;

use regex_syntax::hir::{Hir, HirKind};
use regex_syntax::ParserBuilder;

use crate::error::{Result, ShardError};
use crate::ngram::NGRAM_SIZE;

/// Longest literal worth handing to the planner.
const MAX_RUN_BYTES: usize = 128;

fn parse(pattern: &str) -> Result<Hir> {
    ParserBuilder::new()
        .build()
        .parse(pattern)
        .map_err(|e| ShardError::Query(format!("regexp {:?}: {}", pattern, e)))
}

/// If the whole regex is one literal string, return it.
pub fn as_literal(pattern: &str) -> Result<Option<String>> {
    let hir = parse(pattern)?;
    Ok(match hir.kind() {
        HirKind::Literal(lit) => String::from_utf8(lit.0.to_vec()).ok(),
        _ => None,
    })
}

/// Literal substrings that every match of `pattern` contains, longest first.
/// Only runs of at least three runes are returned, since shorter ones cannot
/// use the trigram index.
///
/// The analysis is conservative: an empty result means "nothing required",
/// never "no match". Alternations keep only runs common to every branch and
/// optional repetitions contribute nothing.
pub fn required_substrings(pattern: &str) -> Result<Vec<String>> {
    let hir = parse(pattern)?;
    let mut runs: Vec<String> = collect(&hir)
        .into_iter()
        .filter(|r| r.len() <= MAX_RUN_BYTES)
        .filter_map(|r| String::from_utf8(r).ok())
        .filter(|s| s.chars().count() >= NGRAM_SIZE)
        .collect();
    runs.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    runs.dedup();
    Ok(runs)
}

fn collect(h: &Hir) -> Vec<Vec<u8>> {
    match h.kind() {
        HirKind::Literal(lit) => vec![lit.0.to_vec()],
        HirKind::Capture(cap) => collect(&cap.sub),
        HirKind::Repetition(rep) if rep.min >= 1 => collect(&rep.sub),
        HirKind::Alternation(branches) => {
            let mut common: Option<BTreeSet<Vec<u8>>> = None;
            for sub in branches {
                let set: BTreeSet<Vec<u8>> = collect(sub).into_iter().collect();
                common = Some(match common {
                    None => set,
                    Some(prev) => prev.intersection(&set).cloned().collect(),
                });
            }
            common.map(|s| s.into_iter().collect()).unwrap_or_default()
        }
        HirKind::Concat(list) => {
            let mut out = Vec::new();
            let mut cur: Vec<u8> = Vec::new();
            for sub in list {
                if let HirKind::Literal(lit) = sub.kind() {
                    cur.extend_from_slice(&lit.0);
                    continue;
                }
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
                out.extend(collect(sub));
            }
            if !cur.is_empty() {
                out.push(cur);
            }
            out
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_literal() {
        assert_eq!(as_literal("abcdef").unwrap().as_deref(), Some("abcdef"));
        assert_eq!(as_literal("abc.ef").unwrap(), None);
        assert_eq!(required_substrings("abcdef").unwrap(), vec!["abcdef"]);
    }

    #[test]
    fn word_boundaries_and_classes_split_runs() {
        assert_eq!(
            required_substrings(r"\bint\s+main\b").unwrap(),
            vec!["main", "int"]
        );
        assert!(required_substrings("a.b").unwrap().is_empty());
        assert!(required_substrings(r"\w+\d*").unwrap().is_empty());
    }

    #[test]
    fn alternation_keeps_common_runs() {
        assert!(required_substrings("foo|bar").unwrap().is_empty());
        assert_eq!(
            required_substrings("(xfoo|yfoo)(bar)+").unwrap(),
            vec!["bar"]
        );
        assert_eq!(required_substrings("(foo|foo)").unwrap(), vec!["foo"]);
    }

    #[test]
    fn optional_parts_are_ignored() {
        assert_eq!(required_substrings("foo(bar)?baz").unwrap(), vec!["baz", "foo"]);
        assert_eq!(required_substrings("fo{3}bar").unwrap(), vec!["bar"]);
    }

    #[test]
    fn unicode_runs_count_runes() {
        assert_eq!(required_substrings("日本語").unwrap(), vec!["日本語"]);
        assert!(required_substrings("日本").unwrap().is_empty());
    }

    #[test]
    fn invalid_regex_is_a_query_error() {
        assert!(matches!(required_substrings("(abc"), Err(ShardError::Query(_))));
    }
}
