//! Integration tests for the rill engine
//!
//! These tests drive the complete pipeline — lex, parse, validate,
//! evaluate — through the public `run` entry point, and pin down the
//! observable contracts: determinism, key-order canonicality, input
//! immutability, the total order, resource bounds, and the path and
//! assignment laws.

use std::collections::BTreeMap;

use rill::{run, ErrorCategory, FaultKind, Limits, Options, RillError, Value};

/// Run a filter and return each output in canonical encoding
fn eval(filter: &str, input: &str) -> Vec<String> {
    try_eval(filter, input).unwrap()
}

fn try_eval(filter: &str, input: &str) -> Result<Vec<String>, RillError> {
    let input = Value::from_serde_json(serde_json::from_str(input).unwrap());
    let outputs = run(filter, &input, &Options::default())?;
    Ok(outputs.iter().map(|v| v.encode_json()).collect())
}

// Spec scenarios

#[test]
fn test_alternative_fallback() {
    assert_eq!(eval(".foo // \"fallback\"", r#"{"foo": null}"#), ["\"fallback\""]);
}

#[test]
fn test_select_evens() {
    assert_eq!(eval("[.[] | select(. % 2 == 0)]", "[1,2,3,4,5]"), ["[2,4]"]);
}

#[test]
fn test_reduce_sum() {
    assert_eq!(eval("reduce .[] as $x (0; . + $x)", "[1,2,3,4]"), ["10"]);
}

#[test]
fn test_keys_sorted() {
    assert_eq!(eval("keys", r#"{"b":1,"a":2}"#), [r#"["a","b"]"#]);
}

#[test]
fn test_setpath_builds_structure() {
    assert_eq!(eval("setpath([\"a\",0]; 7)", "null"), [r#"{"a":[7]}"#]);
}

#[test]
fn test_recursive_factorial() {
    assert_eq!(
        eval(
            "def f: if . == 0 then 1 else . * (. - 1 | f) end; 5 | f",
            "null"
        ),
        ["120"]
    );
}

#[test]
fn test_forbidden_now() {
    let err = try_eval("now", "null").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validate);
}

#[test]
fn test_division_by_zero() {
    let err = try_eval("1/0", "null").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Runtime);
    assert_eq!(err.fault_kind(), Some(FaultKind::Arith));
}

#[test]
fn test_output_cap() {
    let options = Options::default();
    assert_eq!(options.limits.max_outputs, 10_000);
    let err = run("range(10001)", &Value::Null, &options).unwrap_err();
    assert_eq!(err.fault_kind(), Some(FaultKind::Resource));
}

// Universal properties

#[test]
fn test_determinism() {
    let cases = [
        (".a[] | . * 2", r#"{"a":[3,1,2]}"#),
        ("to_entries", r#"{"z":1,"a":{"k":[true,null]}}"#),
        ("[paths]", r#"{"b":[1,{"c":2}],"a":3}"#),
        ("reduce .[] as $x ({}; . + {($x): 1})", r#"["b","a"]"#),
    ];
    for (filter, input) in cases {
        let first = eval(filter, input);
        let second = eval(filter, input);
        assert_eq!(first, second, "{} must be deterministic", filter);
    }
}

#[test]
fn test_key_order_canonicality() {
    let input = r#"{"c":1,"a":2,"b":3}"#;
    assert_eq!(eval("keys", input), [r#"["a","b","c"]"#]);
    assert_eq!(
        eval("[to_entries[].key]", input),
        [r#"["a","b","c"]"#]
    );
    assert_eq!(eval("[.[]]", input), ["[2,3,1]"]);
    // `..` visits object values in key order too
    assert_eq!(eval("[..] | .[1:]", input), ["[2,3,1]"]);
}

#[test]
fn test_input_immutability() {
    let json: serde_json::Value =
        serde_json::from_str(r#"{"a":[1,2],"b":{"c":3}}"#).unwrap();
    let input = Value::from_serde_json(json);
    let before = input.clone();

    run(".a[0] = 99 | .b.c = 0 | delpaths([[\"a\"]])", &input, &Options::default()).unwrap();

    assert_eq!(input, before);
}

#[test]
fn test_total_order_rank_table() {
    // null < false < true < number < string < array < object
    assert_eq!(
        eval("sort", r#"[{"k":1},[1],"s",1,true,false,null]"#),
        [r#"[null,false,true,1,"s",[1],{"k":1}]"#]
    );
}

#[test]
fn test_sort_idempotent_and_stable() {
    let input = r#"[[3,"x"],[1,"y"],[3,"a"],[2,"z"]]"#;
    let once = eval("sort_by(.[0])", input);
    let twice = eval("sort_by(.[0]) | sort_by(.[0])", input);
    assert_eq!(once, twice);
    // Stability: the two [3,_] rows keep their input order
    assert_eq!(once, [r#"[[1,"y"],[2,"z"],[3,"x"],[3,"a"]]"#]);
}

#[test]
fn test_resource_observed_counts_stay_near_cap() {
    let limits = Limits {
        max_steps: 500,
        max_depth: 20,
        max_outputs: 50,
    };
    let options = Options {
        limits,
        ..Options::default()
    };
    let err = run("[range(100000)]", &Value::Null, &options).unwrap_err();
    assert_eq!(err.fault_kind(), Some(FaultKind::Resource));
}

#[test]
fn test_round_trips() {
    assert_eq!(
        eval("to_entries | from_entries", r#"{"a":1,"b":[2],"c":{"d":3}}"#),
        [r#"{"a":1,"b":[2],"c":{"d":3}}"#]
    );
    assert_eq!(eval("explode | implode", "\"héllo wörld\""), ["\"héllo wörld\""]);
    assert_eq!(
        eval("split(\",\") | join(\",\")", "\"a,b,c\""),
        ["\"a,b,c\""]
    );
}

#[test]
fn test_path_law() {
    for (filter, input) in [
        (".a.b", r#"{"a":{"b":1}}"#),
        (".a[1]", r#"{"a":[1,2,3]}"#),
        (".x", r#"{}"#),
        (".[] | select(. > 1)", "[1,2]"),
    ] {
        let law = format!("getpath(path({f})) == ({f})", f = filter);
        assert_eq!(eval(&law, input), ["true"], "path law for {}", filter);
    }
}

#[test]
fn test_assignment_law() {
    assert_eq!(eval(".p = 5 | .p", r#"{"p":1}"#), ["5"]);
    assert_eq!(eval(".p.q = [1] | .p.q", "null"), ["[1]"]);
}

// Broader behavior through the whole pipeline

#[test]
fn test_pipe_comma_ordering() {
    assert_eq!(eval("(1,2) | (., . * 10)", "null"), ["1", "10", "2", "20"]);
}

#[test]
fn test_object_construction_product() {
    assert_eq!(
        eval("{a: (1,2), b: (3,4)}", "null"),
        [
            r#"{"a":1,"b":3}"#,
            r#"{"a":1,"b":4}"#,
            r#"{"a":2,"b":3}"#,
            r#"{"a":2,"b":4}"#
        ]
    );
}

#[test]
fn test_object_duplicate_keys_last_wins() {
    assert_eq!(eval("{a: 1, a: 2}", "null"), [r#"{"a":2}"#]);
}

#[test]
fn test_string_interpolation_pipeline() {
    assert_eq!(
        eval(r#".[] | "\(.name): \(.score)""#, r#"[{"name":"a","score":1}]"#),
        ["\"a: 1\""]
    );
}

#[test]
fn test_nested_interpolation() {
    assert_eq!(eval(r#""a\("b\(1+1)c")d""#, "null"), ["\"ab2cd\""]);
}

#[test]
fn test_slices_and_iteration() {
    assert_eq!(eval(".[2:4]", "[0,1,2,3,4]"), ["[2,3]"]);
    assert_eq!(eval(".[-2:]", "\"hello\""), ["\"lo\""]);
    assert_eq!(eval("[.[][]]", "[[1,2],[3]]"), ["[1,2,3]"]);
}

#[test]
fn test_try_catch_and_optional() {
    assert_eq!(eval("[.[] | .a?]", r#"[{"a":1},5,{"a":2}]"#), ["[1,2]"]);
    assert_eq!(
        eval("try error(\"oops\") catch \"caught: \" + .", "null"),
        ["\"caught: oops\""]
    );
}

#[test]
fn test_try_does_not_catch_resource_faults() {
    let err = try_eval("try (while(true; . + 1)) catch \"caught\"", "0").unwrap_err();
    assert_eq!(err.fault_kind(), Some(FaultKind::Resource));
}

#[test]
fn test_label_break_stops_generation() {
    assert_eq!(
        eval(
            "[label $out | range(10) | if . == 3 then break $out else . end]",
            "null"
        ),
        ["[0,1,2]"]
    );
}

#[test]
fn test_foreach_running_totals() {
    assert_eq!(eval("[foreach .[] as $x (0; . + $x)]", "[1,2,3]"), ["[1,3,6]"]);
}

#[test]
fn test_recursion_via_closures() {
    // Mutual structure: the inner def shadows the outer one
    assert_eq!(
        eval("def f: 1; def g: f + 1; def f: 10; f + g", "null"),
        ["12"]
    );
}

#[test]
fn test_pass_by_filter_arguments_see_use_site() {
    assert_eq!(
        eval("def firsts(f): [.[] | f]; firsts(.[0])", "[[1,2],[3,4]]"),
        ["[1,3]"]
    );
}

#[test]
fn test_delete_through_update_assign() {
    assert_eq!(
        eval(".[] |= (if . == null then empty else . end)", r#"[1,null,2,null]"#),
        ["[1,2]"]
    );
}

#[test]
fn test_compound_assignments_pipeline() {
    assert_eq!(
        eval(".counts[\"a\"] += 1 | .counts[\"a\"] += 1 | .counts", r#"{"counts":{}}"#),
        [r#"{"a":2}"#]
    );
}

#[test]
fn test_walk_normalizes_recursively() {
    assert_eq!(
        eval(
            "walk(if type == \"string\" then ascii_downcase else . end)",
            r#"{"A":["X","y"]}"#
        ),
        [r#"{"A":["x","y"]}"#]
    );
}

#[test]
fn test_recurse_collects_descendants() {
    assert_eq!(
        eval("[.. | select(type == \"number\")]", r#"{"a":[1,{"b":2}],"c":3}"#),
        ["[1,2,3]"]
    );
}

#[test]
fn test_globals_are_visible_as_vars() {
    let mut options = Options::default();
    options.vars.insert(
        "threshold".to_string(),
        Value::from_serde_json(serde_json::json!(2)),
    );
    let input = Value::from_serde_json(serde_json::json!([1, 2, 3]));
    let outputs = run("[.[] | select(. > $threshold)]", &input, &options).unwrap();
    assert_eq!(outputs[0].encode_json(), "[3]");
}

#[test]
fn test_unknown_global_is_runtime_fault() {
    let err = try_eval("$missing", "null").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Runtime);
    assert_eq!(err.fault_kind(), Some(FaultKind::Unbound));
}

#[test]
fn test_error_spans_point_into_source() {
    let filter = ".a | nosuch";
    let err = try_eval(filter, "null").unwrap_err();
    let span = err.span().unwrap();
    assert_eq!(&filter[span.start..span.end], "nosuch");
}

#[test]
fn test_tostring_is_canonical() {
    // Key order and numeric form are stable through tostring
    assert_eq!(
        eval("tostring", r#"{"b":1.0,"a":{"y":[],"x":2}}"#),
        [r#""{\"a\":{\"x\":2,\"y\":[]},\"b\":1}""#]
    );
}

#[test]
fn test_empty_filter_output() {
    assert_eq!(eval("empty", "null"), Vec::<String>::new());
    assert_eq!(eval(".[] | empty", "[1,2,3]"), Vec::<String>::new());
}

#[test]
fn test_vars_map_does_not_leak_between_runs() {
    let mut options = Options::default();
    options.vars.insert("x".to_string(), Value::from(1i64));
    let one = run("$x", &Value::Null, &options).unwrap();
    assert_eq!(one[0], Value::from(1i64));

    let fresh = run("$x", &Value::Null, &Options::default());
    assert!(fresh.is_err());
}

#[test]
fn test_deep_input_bounded_by_depth_cap() {
    // Recursing over an input nested deeper than the cap must trip the
    // depth counter, not the native stack
    let mut json = String::new();
    json.push_str(&"[".repeat(120));
    json.push('1');
    json.push_str(&"]".repeat(120));
    let input = Value::from_serde_json(serde_json::from_str(&json).unwrap());
    let options = Options {
        limits: Limits {
            max_depth: 50,
            ..Limits::default()
        },
        ..Options::default()
    };
    let err = run("[..] | length", &input, &options).unwrap_err();
    assert_eq!(err.fault_kind(), Some(FaultKind::Resource));
}

#[test]
fn test_cartesian_semantics_on_binary_operators() {
    assert_eq!(eval("[(1,2) * (10,100)]", "null"), ["[10,100,20,200]"]);
}

#[test]
fn test_if_condition_fan_out() {
    assert_eq!(
        eval("[if .[] then \"t\" else \"f\" end]", "[true,false,true]"),
        [r#"["t","f","t"]"#]
    );
}

#[test]
fn test_bind_fan_out() {
    assert_eq!(
        eval("[.[] as $x | $x + 10]", "[1,2]"),
        ["[11,12]"]
    );
}

#[test]
fn test_first_short_circuits_infinite_stream() {
    assert_eq!(eval("first(repeat(42))", "null"), ["42"]);
    assert_eq!(eval("[limit(2; range(1000000))]", "null"), ["[0,1]"]);
}
