use zoekt_shard::regex_analyze::{as_literal, required_substrings};

#[test]
fn literal_regexp() {
    assert_eq!(as_literal("fooBar").unwrap().as_deref(), Some("fooBar"));
    assert_eq!(as_literal(r"foo\.bar").unwrap().as_deref(), Some("foo.bar"));
    assert_eq!(as_literal("^foo").unwrap(), None);
}

#[test]
fn required_runs_feed_the_trigram_index() {
    assert_eq!(
        required_substrings(r"func\s+(\w+)Handler").unwrap(),
        vec!["Handler", "func"]
    );
    // two-rune runs are useless to the index
    assert!(required_substrings("ab.cd").unwrap().is_empty());
}

#[test]
fn invalid_regexp_is_a_query_error() {
    let err = required_substrings("foo(").unwrap_err();
    assert!(err.to_string().contains("foo("));
}
