mod common;

use anyhow::Result;
use zoekt_shard::api::{Document, DocumentSection, Symbol};
use zoekt_shard::{Query, SearchOptions};

use common::{names, repo, shard_of, shard_with, text};

#[test]
fn substring_finds_line() -> Result<()> {
    let s = shard_of(&[("a.txt", "hello world\nsecond line\n")])?;
    let res = s.search(&Query::substring("hello"))?;
    assert_eq!(names(&res), vec!["a.txt"]);

    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert_eq!(lm[0].line_number, 1);
    assert_eq!(text(&lm[0].line), "hello world");
    assert_eq!(lm[0].line_fragments[0].line_offset, 0);
    assert_eq!(lm[0].line_fragments[0].match_length, 5);
    assert_eq!(res.stats.match_count, 1);
    assert_eq!(res.stats.file_count, 1);
    assert_eq!(res.files[0].repository, "repo");
    assert_eq!(res.files[0].branches, vec!["main"]);
    assert_eq!(res.files[0].version, "v1");
    Ok(())
}

#[test]
fn case_sensitive_substring_needs_exact_case() -> Result<()> {
    let s = shard_of(&[("a.txt", "hello world\n")])?;
    let res = s.search(&Query::substring("HELLO").case_sensitive(true))?;
    assert!(res.files.is_empty());
    assert_eq!(res.stats.shards_skipped_filter, 1);

    let res = s.search(&Query::substring("HELLO"))?;
    assert_eq!(names(&res), vec!["a.txt"]);
    Ok(())
}

#[test]
fn candidates_across_documents_are_verified() -> Result<()> {
    // "abc" and "bcd" both occur in b.txt, but never as "abcd"
    let s = shard_of(&[("a.txt", "xxabcdxx"), ("b.txt", "abc bcd"), ("c.txt", "abcd abcd")])?;
    let res = s.search(&Query::substring("abcd").content_only())?;
    assert_eq!(names(&res), vec!["a.txt", "c.txt"]);
    let frags = &res.files[1].line_matches[0].line_fragments;
    assert_eq!(frags.iter().map(|f| f.line_offset).collect::<Vec<_>>(), vec![0, 5]);
    Ok(())
}

#[test]
fn file_name_match() -> Result<()> {
    let s = shard_of(&[("src/main.rs", "fn main() {}"), ("README.md", "docs")])?;
    let res = s.search(&Query::substring("main.rs").file_name_only())?;
    assert_eq!(names(&res), vec!["src/main.rs"]);

    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert!(lm[0].file_name);
    assert_eq!(text(&lm[0].line), "src/main.rs");
    assert_eq!(lm[0].line_fragments[0].line_offset, 4);
    assert_eq!(lm[0].line_fragments[0].match_length, 7);
    Ok(())
}

#[test]
fn content_matches_win_over_name_matches() -> Result<()> {
    let s = shard_of(&[("needle.txt", "a needle here\n")])?;
    let res = s.search(&Query::substring("needle"))?;
    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert!(!lm[0].file_name);
    assert_eq!(lm[0].line_fragments[0].line_offset, 2);
    Ok(())
}

#[test]
fn short_pattern_uses_regexp() -> Result<()> {
    let s = shard_of(&[("a.txt", "xaby\n"), ("b.txt", "nothing\n")])?;
    let res = s.search(&Query::substring("ab").content_only())?;
    assert_eq!(names(&res), vec!["a.txt"]);
    assert_eq!(res.files[0].line_matches[0].line_fragments[0].line_offset, 1);
    assert!(res.stats.regexps_considered >= 2);
    Ok(())
}

#[test]
fn regexp_match() -> Result<()> {
    let s = shard_of(&[("a.txt", "foo123bar\nbaz\n"), ("b.txt", "foobar\n")])?;
    let res = s.search(&Query::regexp("foo[0-9]+bar"))?;
    assert_eq!(names(&res), vec!["a.txt"]);
    let f = &res.files[0].line_matches[0].line_fragments[0];
    assert_eq!((f.line_offset, f.match_length), (0, 9));
    Ok(())
}

#[test]
fn regexp_anchors_match_line_starts() -> Result<()> {
    let s = shard_of(&[("a.txt", "x\nfn main\n"), ("b.txt", "x fn main\n")])?;
    let res = s.search(&Query::regexp("^fn m").content_only())?;
    assert_eq!(names(&res), vec!["a.txt"]);
    assert_eq!(res.files[0].line_matches[0].line_number, 2);
    Ok(())
}

#[test]
fn literal_regexp_is_a_substring() -> Result<()> {
    let s = shard_of(&[("a.txt", "some needle\n")])?;
    let res = s.search(&Query::regexp("needle").content_only())?;
    assert_eq!(names(&res), vec!["a.txt"]);
    assert_eq!(res.stats.regexps_considered, 0);
    Ok(())
}

#[test]
fn multiline_match_is_split_per_line() -> Result<()> {
    let s = shard_of(&[("a.txt", "first line\nsecond line\n")])?;
    let res = s.search(&Query::regexp("line\\nsecond").content_only())?;
    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 2);
    assert_eq!((lm[0].line_number, lm[1].line_number), (1, 2));
    assert_eq!(lm[0].line_fragments[0].line_offset, 6);
    assert_eq!(lm[0].line_fragments[0].match_length, 4);
    assert_eq!(lm[1].line_fragments[0].line_offset, 0);
    assert_eq!(lm[1].line_fragments[0].match_length, 6);
    Ok(())
}

#[test]
fn context_lines() -> Result<()> {
    let s = shard_of(&[("a.txt", "one\ntwo\nthree\nfour\nfive\n")])?;
    let opts = SearchOptions {
        num_context_lines: 1,
        ..Default::default()
    };
    let res = s.index.search(&Query::substring("three"), &opts)?;
    let lm = &res.files[0].line_matches[0];
    assert_eq!(lm.line_number, 3);
    assert_eq!(text(&lm.before), "two");
    assert_eq!(text(&lm.after), "four");
    Ok(())
}

#[test]
fn unicode_offsets() -> Result<()> {
    let s = shard_of(&[
        ("a.txt", "ééé abc\n"),
        ("b.txt", "Grüße aus München\nzweite Zeile\n"),
    ])?;
    let res = s.search(&Query::substring("münchen"))?;
    assert_eq!(names(&res), vec!["b.txt"]);
    let f = &res.files[0].line_matches[0].line_fragments[0];
    assert_eq!(f.line_offset, "Grüße aus ".len());
    assert_eq!(f.match_length, "München".len());

    let res = s.search(&Query::substring("abc").content_only())?;
    assert_eq!(names(&res), vec!["a.txt"]);
    assert_eq!(res.files[0].line_matches[0].line_fragments[0].line_offset, "ééé ".len());
    Ok(())
}

#[test]
fn offsets_past_the_rune_sample_stride() -> Result<()> {
    let wide = "é".repeat(150);
    let a = format!("{}needle\n", wide);
    let b = format!("first line\n{}needle\n", wide);
    let s = shard_of(&[("a.txt", a.as_str()), ("b.txt", b.as_str())])?;
    let res = s.search(&Query::substring("needle").content_only())?;
    let mut got = names(&res);
    got.sort();
    assert_eq!(got, vec!["a.txt", "b.txt"]);

    for (name, line_number, offset) in [("a.txt", 1, wide.len()), ("b.txt", 2, "first line\n".len() + wide.len())] {
        let fm = res.files.iter().find(|f| f.file_name == name).expect(name);
        let lm = &fm.line_matches[0];
        assert_eq!(lm.line_number, line_number, "{}", name);
        let frag = &lm.line_fragments[0];
        assert_eq!(frag.offset as usize, offset, "{}", name);
        assert_eq!(frag.line_offset, wide.len(), "{}", name);
        assert_eq!(frag.match_length, "needle".len());
    }
    Ok(())
}

#[test]
fn and_or_not() -> Result<()> {
    let s = shard_of(&[
        ("a.txt", "shared text alpha"),
        ("b.txt", "shared text beta"),
        ("c.txt", "shared text gamma"),
    ])?;
    let q = Query::And(vec![
        Query::substring("shared"),
        Query::Not(Box::new(Query::substring("alpha"))),
    ]);
    assert_eq!(names(&s.search(&q)?), vec!["b.txt", "c.txt"]);

    let q = Query::Or(vec![Query::substring("alpha"), Query::substring("gamma")]);
    assert_eq!(names(&s.search(&q)?), vec!["a.txt", "c.txt"]);

    let q = Query::And(vec![Query::substring("alpha"), Query::substring("zzzz")]);
    assert!(s.search(&q)?.files.is_empty());

    assert_eq!(s.search(&Query::Const(true))?.files.len(), 3);
    assert!(s.search(&Query::Const(false))?.files.is_empty());
    Ok(())
}

#[test]
fn match_everything_reports_file_name() -> Result<()> {
    let s = shard_of(&[("a.txt", "content")])?;
    let res = s.search(&Query::Const(true))?;
    let lm = &res.files[0].line_matches[0];
    assert!(lm.file_name);
    assert_eq!(text(&lm.line), "a.txt");
    Ok(())
}

fn symbol_doc() -> Document {
    let mut d = Document::new("a.go", "func Foo() {}\nvar x = Foo()\nfunc Bar() {}\n").with_branches(["main"]);
    d.symbols = vec![
        DocumentSection { start: 5, end: 8 },
        DocumentSection { start: 33, end: 36 },
    ];
    d.symbols_meta_data = vec![
        Symbol {
            kind: "function".into(),
            ..Default::default()
        },
        Symbol {
            kind: "function".into(),
            ..Default::default()
        },
    ];
    d
}

#[test]
fn symbol_substring_only_matches_definitions() -> Result<()> {
    let s = shard_with(repo("repo", &["main"]), vec![symbol_doc()])?;
    let res = s.search(&Query::Symbol(Box::new(Query::substring("foo"))))?;
    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert_eq!(lm[0].line_number, 1);
    let sym = lm[0].line_fragments[0].symbol_info.as_ref().expect("symbol info");
    assert_eq!(sym.sym, "Foo");
    assert_eq!(sym.kind, "function");

    let plain = s.search(&Query::substring("foo").content_only())?;
    let lines: Vec<usize> = plain.files[0].line_matches.iter().map(|l| l.line_number).collect();
    assert_eq!(lines, vec![1, 2]);
    assert!(plain.files[0].line_matches[1].line_fragments[0].symbol_info.is_none());
    Ok(())
}

#[test]
fn symbol_regexp() -> Result<()> {
    let s = shard_with(repo("repo", &["main"]), vec![symbol_doc()])?;
    let res = s.search(&Query::Symbol(Box::new(Query::regexp("^Ba"))))?;
    let lm = &res.files[0].line_matches;
    assert_eq!(lm.len(), 1);
    assert_eq!(lm[0].line_number, 3);
    let f = &lm[0].line_fragments[0];
    assert_eq!((f.line_offset, f.match_length), (5, 2));
    assert_eq!(f.symbol_info.as_ref().map(|s| s.sym.as_str()), Some("Bar"));

    let exact = s.search(&Query::Symbol(Box::new(Query::regexp("^Bar$"))))?;
    assert_eq!(exact.files.len(), 1);
    let none = s.search(&Query::Symbol(Box::new(Query::regexp("^Ba$"))))?;
    assert!(none.files.is_empty());
    Ok(())
}

#[test]
fn symbol_of_other_query_is_an_error() -> Result<()> {
    let s = shard_with(repo("repo", &["main"]), vec![symbol_doc()])?;
    let q = Query::Symbol(Box::new(Query::branch("main")));
    assert!(s.search(&q).is_err());
    Ok(())
}

fn branch_shard() -> Result<common::TestShard> {
    shard_with(
        repo("repo", &["main", "dev"]),
        vec![
            Document::new("a.txt", "shared text alpha").with_branches(["main"]),
            Document::new("b.txt", "shared text beta").with_branches(["main", "dev"]),
            Document::new("c.txt", "shared text gamma").with_branches(["dev"]),
        ],
    )
}

#[test]
fn branch_filter() -> Result<()> {
    let s = branch_shard()?;
    let q = Query::And(vec![Query::substring("shared"), Query::branch("dev")]);
    let res = s.search(&q)?;
    assert_eq!(names(&res), vec!["b.txt", "c.txt"]);
    assert!(res.files.iter().all(|f| f.branches == vec!["dev"]));

    let res = s.search(&Query::substring("beta"))?;
    assert_eq!(res.files[0].branches, vec!["main", "dev"]);
    assert_eq!(res.files[0].version, "v1");

    let res = s.search(&Query::substring("gamma"))?;
    assert_eq!(res.files[0].version, "v2");
    Ok(())
}

#[test]
fn head_selects_first_branch() -> Result<()> {
    let s = branch_shard()?;
    let res = s.search(&Query::branch("HEAD"))?;
    assert_eq!(names(&res), vec!["a.txt", "b.txt"]);

    let exact = Query::Branch {
        pattern: "de".into(),
        exact: true,
    };
    assert!(s.search(&exact)?.files.is_empty());
    assert_eq!(s.search(&Query::branch("de"))?.files.len(), 2);
    Ok(())
}

#[test]
fn file_tombstones_are_skipped() -> Result<()> {
    let mut r = repo("repo", &["main"]);
    r.file_tombstones.insert("b.txt".to_string());
    let s = shard_with(
        r,
        vec![
            Document::new("a.txt", "needle").with_branches(["main"]),
            Document::new("b.txt", "needle").with_branches(["main"]),
        ],
    )?;
    assert_eq!(names(&s.search(&Query::substring("needle"))?), vec!["a.txt"]);
    Ok(())
}

#[test]
fn match_limits() -> Result<()> {
    let s = shard_of(&[("a.txt", "needle"), ("b.txt", "needle"), ("c.txt", "needle")])?;
    let opts = SearchOptions {
        shard_max_match_count: 1,
        ..Default::default()
    };
    let res = s.index.search(&Query::substring("needle"), &opts)?;
    assert_eq!(names(&res), vec!["a.txt"]);
    assert_eq!(res.stats.files_skipped, 2);

    let opts = SearchOptions {
        max_doc_display_count: 2,
        whole: true,
        ..Default::default()
    };
    let res = s.index.search(&Query::substring("needle"), &opts)?;
    assert_eq!(res.files.len(), 2);
    assert_eq!(res.files[0].content.as_deref(), Some(&b"needle"[..]));
    Ok(())
}

#[test]
fn results_carry_language_and_checksum() -> Result<()> {
    let mut d = Document::new("main.go", "package main\n").with_branches(["main"]);
    d.language = "Go".into();
    let s = shard_with(repo("repo", &["main"]), vec![d])?;
    let res = s.search(&Query::substring("package"))?;
    assert_eq!(res.files[0].language, "Go");
    assert_eq!(res.files[0].checksum.len(), 8);
    assert!(res.repo_urls.contains_key("repo"));
    Ok(())
}
