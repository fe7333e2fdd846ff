//! Summation and Count over a filtered relation.

use relata::prelude::*;
use relata::query::id_of;
use serde_json::{json, Value};

fn schema() -> Schema {
    Schema::builder()
        .entity(EntityDef::new("User").property(Property::string("name").required()))
        .entity(
            EntityDef::new("Deduction")
                .property(Property::string("reason"))
                .property(Property::number("points").required()),
        )
        .relation(
            RelationDef::new(
                "User",
                "deductions",
                "Deduction",
                "users",
                Cardinality::ManyToMany,
            )
            .named("UserDeduction")
            .property(Property::boolean("active").default_value(true)),
        )
        .relation(
            RelationDef::filtered("ActiveDeduction", "UserDeduction", MatchExp::eq("active", true))
                .navigation("activeDeductions", "activeUsers"),
        )
        .build()
        .unwrap()
}

fn computations() -> Vec<Computation> {
    vec![
        Aggregate::summation("TotalPoints", "User", "totalPoints", "activeDeductions", "points")
            .into(),
        Aggregate::count("ActiveCount", "User", "activeCount", "deductions")
            .filter(MatchExp::eq("&.active", true))
            .into(),
    ]
}

struct Fixture {
    host: Controller,
    user: i64,
    deductions: Vec<i64>,
}

fn id(record: &Record) -> i64 {
    record.get("id").and_then(id_of).unwrap()
}

fn fixture() -> Fixture {
    let host = Controller::open(&schema(), computations(), &RuntimeSettings::default()).unwrap();
    let engine = host.engine();
    let user = id(&engine.create("User", json!({"name": "ada"})).unwrap());
    let deductions = [("late", 3), ("noise", 5), ("mess", 2)]
        .into_iter()
        .map(|(reason, points)| {
            id(&engine
                .create("Deduction", json!({"reason": reason, "points": points}))
                .unwrap())
        })
        .collect::<Vec<_>>();
    for deduction in &deductions {
        engine
            .add_relation_by_name_by_id("UserDeduction", user, *deduction, Value::Null)
            .unwrap();
    }
    Fixture {
        host,
        user,
        deductions,
    }
}

fn stored(f: &Fixture) -> (Value, Value) {
    let user = f
        .host
        .engine()
        .find_one(
            "User",
            Some(MatchExp::id(f.user)),
            None,
            &AttributeQuery::fields(["totalPoints", "activeCount"]),
        )
        .unwrap()
        .unwrap();
    (user["totalPoints"].clone(), user["activeCount"].clone())
}

/// Points of the user's active deductions, summed by hand.
fn direct_total(f: &Fixture) -> i64 {
    f.host
        .engine()
        .find_relation_by_name(
            "ActiveDeduction",
            Some(MatchExp::eq("source", f.user)),
            None,
            &AttributeQuery::new().nest("target", AttributeQuery::fields(["points"])),
        )
        .unwrap()
        .iter()
        .filter_map(|link| link["target"]["points"].as_i64())
        .sum()
}

#[test]
fn test_new_owner_starts_at_zero() {
    let host = Controller::open(&schema(), computations(), &RuntimeSettings::default()).unwrap();
    let user = host.engine().create("User", json!({"name": "bo"})).unwrap();
    let handle = host.bound_state("TotalPoints").unwrap();
    assert_eq!(handle.get(host.engine(), id(&user)).unwrap(), Some(json!(0)));
}

#[test]
fn test_sum_over_linked_records() {
    let f = fixture();
    assert_eq!(stored(&f), (json!(10), json!(3)));
    assert_eq!(direct_total(&f), 10);
    assert!(f.host.take_failures().is_empty());
}

#[test]
fn test_deactivating_a_link() {
    let f = fixture();
    f.host
        .engine()
        .update_relation_by_name(
            "UserDeduction",
            MatchExp::eq("target", f.deductions[1]),
            json!({"active": false}),
        )
        .unwrap();
    assert_eq!(stored(&f), (json!(5), json!(2)));
    assert_eq!(direct_total(&f), 5);

    f.host
        .engine()
        .update_relation_by_name(
            "UserDeduction",
            MatchExp::eq("target", f.deductions[1]),
            json!({"active": true}),
        )
        .unwrap();
    assert_eq!(stored(&f), (json!(10), json!(3)));
}

#[test]
fn test_removing_a_link() {
    let f = fixture();
    f.host
        .engine()
        .remove_relation_by_name(
            "UserDeduction",
            MatchExp::eq("source", f.user).and(MatchExp::eq("target", f.deductions[0])),
        )
        .unwrap();
    assert_eq!(stored(&f), (json!(7), json!(2)));
    assert_eq!(direct_total(&f), 7);
}

#[test]
fn test_deleting_a_related_record() {
    let f = fixture();
    f.host
        .engine()
        .delete("Deduction", MatchExp::id(f.deductions[2]))
        .unwrap();
    assert_eq!(stored(&f), (json!(8), json!(2)));
}

#[test]
fn test_updating_a_summed_field() {
    let f = fixture();
    f.host
        .engine()
        .update("Deduction", MatchExp::id(f.deductions[0]), json!({"points": 13}))
        .unwrap();
    assert_eq!(stored(&f), (json!(20), json!(3)));
    assert_eq!(direct_total(&f), 20);
}

#[test]
fn test_fractional_points() {
    let f = fixture();
    f.host
        .engine()
        .update("Deduction", MatchExp::id(f.deductions[2]), json!({"points": 2.5}))
        .unwrap();
    assert_eq!(stored(&f).0, json!(10.5));
}

#[test]
fn test_inline_link_counts() {
    let f = fixture();
    let engine = f.host.engine();
    let user = engine
        .create(
            "User",
            json!({
                "name": "bo",
                "deductions": [
                    {"id": f.deductions[0]},
                    {"reason": "late again", "points": 4, "&": {"active": false}}
                ]
            }),
        )
        .unwrap();
    let handle = f.host.bound_state("TotalPoints").unwrap();
    assert_eq!(handle.get(engine, id(&user)).unwrap(), Some(json!(3)));
    let count = f.host.bound_state("ActiveCount").unwrap();
    assert_eq!(count.get(engine, id(&user)).unwrap(), Some(json!(1)));
}

#[test]
fn test_unknown_summed_field_fails_setup() {
    let err = Controller::open(
        &schema(),
        vec![Aggregate::summation("Bad", "User", "bad", "activeDeductions", "weight").into()],
        &RuntimeSettings::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn test_sum_past_integer_range_continues_as_float() {
    let f = fixture();
    f.host
        .engine()
        .update("Deduction", MatchExp::id(f.deductions[0]), json!({"points": i64::MAX}))
        .unwrap();
    let total = stored(&f).0;
    assert!(total.is_f64());
    assert!(total.as_f64().unwrap() >= i64::MAX as f64);
    assert!(f.host.take_failures().is_empty());
}
