/// Tuple encoding tests
///
/// Byte order of encoded keys must agree with tuple order, and every key must
/// decode back to itself.
/// Run with: cargo test --test encoding_tests
use tuplekv::encoding::{decode_tuple, encode_tuple};
use tuplekv::{Component, StoreError, Tuple, tuple};

fn samples() -> Vec<Tuple> {
    vec![
        tuple![],
        tuple![Component::Null],
        tuple![Component::Null, Component::Null],
        tuple![Vec::<u8>::new()],
        tuple![vec![0u8]],
        tuple![vec![0u8, 0xFF]],
        tuple![vec![1u8, 2, 3]],
        tuple![""],
        tuple!["a"],
        tuple!["a\0"],
        tuple!["a\0b"],
        tuple!["a\u{1}"],
        tuple!["ab"],
        tuple!["é"],
        tuple![Tuple::new()],
        tuple![tuple![Component::Null]],
        tuple![tuple!["a"]],
        tuple![tuple!["a", Component::Null]],
        tuple![tuple![tuple![1]], 2],
        tuple![i64::MIN],
        tuple![-1_000_000],
        tuple![-2],
        tuple![-1],
        tuple![0],
        tuple![1],
        tuple![123],
        tuple![i64::MAX],
        tuple![f64::NEG_INFINITY],
        tuple![-1.5],
        tuple![-0.0],
        tuple![0.0],
        tuple![f64::MIN_POSITIVE],
        tuple![2.5],
        tuple![f64::INFINITY],
        tuple![f64::NAN],
        tuple![false],
        tuple![true],
        tuple!["log", 3],
        tuple!["ver", tuple!["doc", 7], 12],
        tuple!["ver", tuple!["doc", 7, Component::Null], 0],
        tuple!["ver", tuple!["doc", 8], -1],
    ]
}

#[test]
fn test_round_trip() {
    for t in samples() {
        let decoded = decode_tuple(&encode_tuple(&t)).unwrap();
        assert_eq!(decoded, t, "round trip of {}", t);
    }
}

#[test]
fn test_byte_order_matches_tuple_order() {
    let samples = samples();
    for a in &samples {
        for b in &samples {
            assert_eq!(
                encode_tuple(a).cmp(&encode_tuple(b)),
                a.cmp(b),
                "comparing {} with {}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_type_rank_order() {
    let ranked = [
        tuple![Component::Null],
        tuple![vec![0xFFu8]],
        tuple!["zzz"],
        tuple![tuple![true]],
        tuple![i64::MAX],
        tuple![f64::INFINITY],
        tuple![false],
    ];
    for pair in ranked.windows(2) {
        assert!(pair[0] < pair[1]);
        assert!(encode_tuple(&pair[0]) < encode_tuple(&pair[1]));
    }
}

#[test]
fn test_truncated_input_rejected() {
    let encoded = encode_tuple(&tuple![42, "text"]);
    for len in 1..encoded.len() {
        if let Ok(t) = decode_tuple(&encoded[..len]) {
            // a cut at a component boundary is itself a valid, shorter key
            assert!(t < tuple![42, "text"]);
        }
    }
    assert!(matches!(
        decode_tuple(&[0x15, 0x80]),
        Err(StoreError::Encoding(_))
    ));
}
