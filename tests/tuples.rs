// tests/tuples.rs
use ductflow::tuple::{Composite, Narrow, Override, Selected, Slot};
use ductflow::*;
use proptest::prelude::*;

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,6}".prop_map(Value::Str),
    ]
}

fn row(max: usize) -> impl Strategy<Value = Tuple> {
    prop::collection::vec(value(), 0..max).prop_map(Tuple::from)
}

fn row_with_positions() -> impl Strategy<Value = (Tuple, Vec<usize>)> {
    row(8)
        .prop_filter("non-empty", |t| !t.is_empty())
        .prop_flat_map(|t| {
            let width = t.len();
            (Just(t), prop::collection::vec(0..width, 0..10))
        })
}

proptest! {
    #[test]
    fn narrow_view_copies_like_select((tuple, positions) in row_with_positions()) {
        let view = Narrow::new(&tuple, &positions);
        prop_assert_eq!(view.to_tuple(), tuple.select(&positions));
    }

    #[test]
    fn composite_is_associative(a in row(5), b in row(5), c in row(5)) {
        let ab = Composite::pair(&a, &b);
        let bc = Composite::pair(&b, &c);
        let left = Composite::pair(&ab, &c);
        let right = Composite::pair(&a, &bc);
        prop_assert_eq!(left.size(), a.len() + b.len() + c.len());
        prop_assert_eq!(left.to_tuple(), right.to_tuple());
        prop_assert!(left.content_eq(&right));
    }

    #[test]
    fn nested_narrow_composes_positions((tuple, outer) in row_with_positions()) {
        let width = outer.len();
        let inner: Vec<usize> = (0..width).rev().collect();
        let once = Narrow::new(&tuple, &outer);
        let twice = Narrow::new(&once, &inner);
        let direct: Vec<usize> = inner.iter().map(|&i| outer[i]).collect();
        prop_assert_eq!(twice.to_tuple(), tuple.select(&direct));
    }
}

#[test]
fn override_replaces_positions_in_place() {
    let incoming = tuple![1, 2, 3, 4];
    let result = tuple![9, 8];
    let view = Override::new(&incoming, &result, &[None, Some(0), Some(1), None]);
    assert_eq!(view.to_tuple(), tuple![1, 9, 8, 4]);
}

#[test]
fn selected_picks_from_both_sides() {
    let incoming = tuple!["a", "b"];
    let result = tuple![1];
    let slots = [Slot::Result(0), Slot::Incoming(1)];
    let view = Selected::new(&incoming, &result, &slots);
    assert_eq!(view.to_tuple(), tuple![1, "b"]);
}

#[test]
fn values_order_nulls_first_and_numbers_numerically() {
    let mut values = vec![
        Value::from("x"),
        Value::from(2.5),
        Value::from(2),
        Value::Null,
        Value::from(true),
    ];
    values.sort();
    assert_eq!(
        values,
        vec![
            Value::Null,
            Value::from(true),
            Value::from(2),
            Value::from(2.5),
            Value::from("x"),
        ]
    );
}

#[test]
fn fields_resolve_names_and_positions() -> anyhow::Result<()> {
    let declared = Fields::names(["a", "b", "c"]);
    assert_eq!(Fields::names(["c", "a"]).resolve(&declared)?, vec![2, 0]);
    assert_eq!(Fields::positions([-1, 0]).resolve(&declared)?, vec![2, 0]);
    assert_eq!(Fields::All.resolve(&declared)?, vec![0, 1, 2]);
    assert!(matches!(
        Fields::names(["z"]).resolve(&declared),
        Err(FieldsError::NotFound(..))
    ));
    Ok(())
}
