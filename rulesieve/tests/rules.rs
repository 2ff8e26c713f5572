use std::collections::HashMap;
use std::time::Instant;

use rulesieve::Machine;

fn machine_with(rules: &[(&str, &str)]) -> Machine {
    let mut machine = Machine::default();
    for (name, definition) in rules {
        machine.add_rule(name.to_string(), definition).unwrap();
    }
    machine
}

fn matched(machine: &Machine, event: &str) -> Vec<String> {
    let mut rules = machine.rules_for_json_event(event).unwrap();
    rules.sort();
    rules
}

fn names(rules: &[&str]) -> Vec<String> {
    rules.iter().map(|s| s.to_string()).collect()
}

#[test]
fn prefix_rule() {
    let machine = machine_with(&[("rule", r#"{"x": [{"prefix": "foo"}]}"#)]);
    assert_eq!(matched(&machine, r#"{"x": "foobar"}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": "foo"}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": "bar"}"#), names(&[]));
    // Prefixes constrain strings, not numbers.
    assert_eq!(matched(&machine, r#"{"x": 42}"#), names(&[]));
}

#[test]
fn suffix_rule() {
    let machine = machine_with(&[("rule", r#"{"x": [{"suffix": "bar"}]}"#)]);
    assert_eq!(matched(&machine, r#"{"x": "foobar"}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": "bar"}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": "barfoo"}"#), names(&[]));
}

#[test]
fn exact_and_anything_but_split_the_value_space() {
    let machine = machine_with(&[
        ("r1", r#"{"a": ["v"]}"#),
        ("r2", r#"{"a": [{"anything-but": "v"}]}"#),
    ]);
    assert_eq!(matched(&machine, r#"{"a": "v"}"#), names(&["r1"]));
    assert_eq!(matched(&machine, r#"{"a": "w"}"#), names(&["r2"]));
    assert_eq!(matched(&machine, r#"{"a": "vv"}"#), names(&["r2"]));
    assert_eq!(matched(&machine, r#"{"b": "v"}"#), names(&[]));
}

#[test]
fn equals_ignore_case_rule() {
    let machine = machine_with(&[("rule", r#"{"x": [{"equals-ignore-case": "jAVa"}]}"#)]);
    for hit in ["JAVA", "jAvA", "java"] {
        assert_eq!(
            matched(&machine, &format!(r#"{{"x": "{hit}"}}"#)),
            names(&["rule"]),
            "{hit}"
        );
    }
    for miss in ["javax", "ava"] {
        assert_eq!(
            matched(&machine, &format!(r#"{{"x": "{miss}"}}"#)),
            names(&[]),
            "{miss}"
        );
    }
}

#[test]
fn wildcard_rule() {
    let machine = machine_with(&[("rule", r#"{"x": [{"wildcard": "eu-*-1"}]}"#)]);
    assert_eq!(matched(&machine, r#"{"x": "eu-west-1"}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": "eu--1"}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": "eu-west-2"}"#), names(&[]));
    assert_eq!(matched(&machine, r#"{"x": "us-west-1"}"#), names(&[]));
}

#[test]
fn open_open_range_matches_only_the_interior() {
    let machine = machine_with(&[("rule", r#"{"x": [{"numeric": [">", 1.11, "<", 3.33]}]}"#)]);
    assert_eq!(matched(&machine, r#"{"x": 1.11}"#), names(&[]));
    assert_eq!(matched(&machine, r#"{"x": 2.0}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": 3.33}"#), names(&[]));
}

#[test]
fn numeric_equality_across_representations() {
    let machine = machine_with(&[("rule", r#"{"x": [35]}"#)]);
    assert_eq!(matched(&machine, r#"{"x": 35}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": 35.0}"#), names(&["rule"]));
    assert_eq!(matched(&machine, r#"{"x": 3.5e1}"#), names(&["rule"]));
    // The string "35" is a different animal.
    assert_eq!(matched(&machine, r#"{"x": "35"}"#), names(&[]));
}

#[test]
fn non_numeric_values_fail_numeric_rules_silently() {
    let machine = machine_with(&[("rule", r#"{"x": [{"numeric": [">=", -1000000000]}]}"#)]);
    assert_eq!(matched(&machine, r#"{"x": "0A,"}"#), names(&[]));
    assert_eq!(matched(&machine, r#"{"x": 0}"#), names(&["rule"]));
}

#[test]
fn exists_and_absent() {
    let machine = machine_with(&[
        ("has-a", r#"{"a": [{"exists": true}]}"#),
        ("no-a", r#"{"a": [{"exists": false}], "b": [{"exists": true}]}"#),
    ]);
    assert_eq!(matched(&machine, r#"{"a": "anything"}"#), names(&["has-a"]));
    assert_eq!(matched(&machine, r#"{"a": 3}"#), names(&["has-a"]));
    assert_eq!(matched(&machine, r#"{"b": "x"}"#), names(&["no-a"]));
    assert_eq!(matched(&machine, r#"{"c": "x"}"#), names(&[]));
}

const TWO_SONG_EVENT: &str = r#"{
    "Genre": "rock",
    "Songs": [
        {
            "Name": "Norwegian Wood",
            "Writers": [{"First": "John", "Last": "Lennon"}]
        },
        {
            "Name": "Paint It Black",
            "Writers": [{"First": "Keith", "Last": "Richards"}]
        }
    ]
}"#;

#[test]
fn array_consistency_joins_fields_of_the_same_element() {
    let machine = machine_with(&[(
        "nw-john",
        r#"{"Songs": {"Name": ["Norwegian Wood"], "Writers": {"First": ["John"]}}}"#,
    )]);
    assert_eq!(matched(&machine, TWO_SONG_EVENT), names(&["nw-john"]));
}

#[test]
fn array_consistency_matches_through_any_element() {
    let machine = machine_with(&[(
        "pib-keith",
        r#"{"Songs": {"Name": ["Paint It Black"], "Writers": {"First": ["Keith"]}}}"#,
    )]);
    assert_eq!(matched(&machine, TWO_SONG_EVENT), names(&["pib-keith"]));
}

#[test]
fn array_consistency_rejects_cross_element_joins() {
    // "Norwegian Wood" sits at index 0, Keith at index 1: the same rule
    // may not stitch them together.
    let machine = machine_with(&[(
        "nw-keith",
        r#"{"Songs": {"Name": ["Norwegian Wood"], "Writers": {"First": ["Keith"]}}}"#,
    )]);
    assert_eq!(matched(&machine, TWO_SONG_EVENT), names(&[]));
}

#[test]
fn fields_outside_arrays_join_freely() {
    let machine = machine_with(&[(
        "genre-keith",
        r#"{"Genre": ["rock"], "Songs": {"Writers": {"First": ["Keith"]}}}"#,
    )]);
    assert_eq!(matched(&machine, TWO_SONG_EVENT), names(&["genre-keith"]));
}

#[test]
fn map_path_skips_array_consistency() {
    // The pre-flattened path has no membership information, so the
    // cross-element join that the JSON path rejects is accepted here.
    let machine = machine_with(&[(
        "nw-keith",
        r#"{"Songs.Name": ["Norwegian Wood"], "Songs.Writers.First": ["Keith"]}"#,
    )]);
    let event = HashMap::from([
        (
            "Songs.Name".to_string(),
            vec!["\"Norwegian Wood\"".to_string(), "\"Paint It Black\"".to_string()],
        ),
        (
            "Songs.Writers.First".to_string(),
            vec!["\"John\"".to_string(), "\"Keith\"".to_string()],
        ),
    ]);
    let mut rules = machine.rules_for_event(&event);
    rules.sort();
    assert_eq!(rules, names(&["nw-keith"]));
}

#[test]
fn disjunctions_expand_into_sub_rules() {
    let machine = machine_with(&[(
        "r",
        r#"{"source": ["orders"], "$or": [{"state": ["failed"]}, {"retries": [{"numeric": [">", 3]}]}]}"#,
    )]);
    assert_eq!(
        matched(&machine, r#"{"source": "orders", "state": "failed"}"#),
        names(&["r"])
    );
    assert_eq!(
        matched(&machine, r#"{"source": "orders", "retries": 5}"#),
        names(&["r"])
    );
    assert_eq!(
        matched(&machine, r#"{"source": "orders", "state": "ok", "retries": 1}"#),
        names(&[])
    );
}

#[test]
fn add_delete_cycles_leave_no_residue() {
    let rules = [
        ("exact", r#"{"a": ["x", "y"]}"#),
        ("prefix", r#"{"a": [{"prefix": "x"}]}"#),
        ("deep", r#"{"a": {"b": {"c": [{"suffix": "z"}]}}}"#),
        ("wild", r#"{"w": [{"wildcard": "a*b"}]}"#),
        ("range", r#"{"n": [{"numeric": [">=", 0, "<", 10]}]}"#),
        ("not", r#"{"a": [{"anything-but": ["x", "q"]}]}"#),
        ("or", r#"{"$or": [{"p": ["1"]}, {"q": ["2"]}]}"#),
        ("absent", r#"{"a": ["x"], "gone": [{"exists": false}]}"#),
    ];
    let mut machine = machine_with(&rules);
    assert!(machine.is_empty() == false);
    let baseline = machine.approximate_object_count();

    // Deleting half and re-adding restores the same footprint.
    for (name, definition) in &rules[..4] {
        machine.delete_rule(&name.to_string(), definition).unwrap();
    }
    for (name, definition) in &rules[..4] {
        machine.add_rule(name.to_string(), definition).unwrap();
    }
    assert_eq!(machine.approximate_object_count(), baseline);

    for (name, definition) in rules.iter().rev() {
        machine.delete_rule(&name.to_string(), definition).unwrap();
    }
    assert!(machine.is_empty());
    assert_eq!(machine.approximate_object_count(), 1);
}

#[test]
fn parallel_readers_agree_with_sequential_matching() {
    let machine = machine_with(&[
        ("nw-john", r#"{"Songs": {"Name": ["Norwegian Wood"], "Writers": {"First": ["John"]}}}"#),
        ("genre", r#"{"Genre": [{"prefix": "ro"}]}"#),
        ("range", r#"{"Genre": [{"numeric": ["<", 0]}]}"#),
    ]);
    let sequential = matched(&machine, TWO_SONG_EVENT);
    assert_eq!(sequential, names(&["genre", "nw-john"]));

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| matched(&machine, TWO_SONG_EVENT)))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), sequential);
        }
    });
}

#[test]
fn big_array_event_stays_fast() {
    let machine = machine_with(&[("rule", r#"{"xs": [{"prefix": "item-90"}]}"#)]);
    let values: Vec<String> = (0..20_000).map(|i| format!("\"item-{i}\"")).collect();
    let event = format!(r#"{{"xs": [{}]}}"#, values.join(","));

    let start = Instant::now();
    let rules = machine.rules_for_json_event(&event).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(rules, names(&["rule"]));
    assert!(
        elapsed.as_millis() < 1000,
        "matching took {elapsed:?} on a 20k-element array"
    );
}

#[test]
fn deep_and_wide_events() {
    let machine = machine_with(&[
        ("deep", r#"{"a": {"b": {"c": {"d": ["leaf"]}}}}"#),
        ("wide", r#"{"k3": ["v3"], "k7": ["v7"]}"#),
    ]);
    assert_eq!(
        matched(&machine, r#"{"a": {"b": {"c": {"d": "leaf"}}}}"#),
        names(&["deep"])
    );
    let wide: String = format!(
        "{{{}}}",
        (0..10)
            .map(|i| format!(r#""k{i}": "v{i}""#))
            .collect::<Vec<_>>()
            .join(",")
    );
    assert_eq!(matched(&machine, &wide), names(&["wide"]));
}
