use proptest::prelude::*;
use sift::script::{parse_script, Interpreter, Stream};

fn run(src: &str, input: Stream) -> Stream {
    let program = parse_script(src).expect("script should lex");
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let result = rt
        .block_on(Interpreter::new().process(input, &program))
        .expect("single run is never superseded");
    assert!(result.is_complete, "run failed: {:?}", result.error);
    result.output
}

fn nums(values: &[i64]) -> Stream {
    Stream::from(values.to_vec())
}

fn small_ints() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0i64..100, 0..24)
}

proptest! {
    #[test]
    fn exit_only_is_identity(input in ".*") {
        prop_assert_eq!(run("exit", Stream::from(input.as_str())), Stream::from(input.as_str()));
    }

    #[test]
    fn map_is_elementwise(values in small_ints()) {
        let expected: Vec<i64> = values
            .iter()
            .enumerate()
            .map(|(i, v)| v * 3 + i as i64)
            .collect();
        prop_assert_eq!(run("map\n  stream * 3 + index", nums(&values)), nums(&expected));
    }

    #[test]
    fn filter_preserves_order(values in small_ints(), threshold in 0i64..100) {
        let expected: Vec<i64> = values.iter().copied().filter(|v| *v > threshold).collect();
        let src = format!("filter\n  stream > {threshold}");
        prop_assert_eq!(run(&src, nums(&values)), nums(&expected));
    }

    #[test]
    fn sort_by_is_a_stable_sort(values in small_ints()) {
        // Key on the tens digit so equal keys keep their input order.
        let mut expected = values.clone();
        expected.sort_by_key(|v| v / 10);
        let src = "sortBy\n  (stream - modulo(10)) / 10";
        prop_assert_eq!(run(src, nums(&values)), nums(&expected));
    }

    #[test]
    fn pivot_groups_by_first_occurrence(values in small_ints()) {
        let mut groups: Vec<(i64, Vec<i64>)> = Vec::new();
        for v in &values {
            match groups.iter_mut().find(|(k, _)| *k == v % 3) {
                Some((_, group)) => group.push(*v),
                None => groups.push((v % 3, vec![*v])),
            }
        }
        let Stream::Map(map) = run("pivot\n  modulo(3)", nums(&values)) else {
            return Err(TestCaseError::fail("pivot should produce a map"));
        };
        let actual: Vec<(Stream, Stream)> = map.into_iter().collect();
        let expected: Vec<(Stream, Stream)> = groups
            .into_iter()
            .map(|(k, group)| (Stream::from(k), nums(&group)))
            .collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn arithmetic_precedence(a in 0i64..50, b in 0i64..50, c in 0i64..50) {
        let out = run(&format!("{a} + {b} * {c} - {a}"), Stream::from(""));
        prop_assert_eq!(out, Stream::from(b * c));
    }

    #[test]
    fn parser_never_panics(src in "[a-z0-9 \t\n:<>=()\\[\\],.\"+*/&|!-]{0,64}") {
        let _ = parse_script(&src);
    }
}
