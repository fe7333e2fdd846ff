//! Filtered entities and relations: reads, writes and membership changes.

use relata::error::MutationError;
use relata::prelude::*;
use relata::query::id_of;
use serde_json::{json, Value};

fn schema() -> Schema {
    Schema::builder()
        .entity(
            EntityDef::new("User")
                .property(Property::string("name").required())
                .property(Property::number("age")),
        )
        .entity(EntityDef::new("Team").property(Property::string("title")))
        .entity(EntityDef::filtered(
            "Adult",
            "User",
            MatchExp::atom("age", Operator::Gte, 18),
        ))
        .entity(EntityDef::filtered(
            "Senior",
            "Adult",
            MatchExp::atom("age", Operator::Gte, 65),
        ))
        .relation(
            RelationDef::new("User", "teams", "Team", "members", Cardinality::ManyToMany)
                .named("Membership")
                .property(Property::string("role").default_value("member")),
        )
        .relation(
            RelationDef::filtered("Leadership", "Membership", MatchExp::eq("role", "lead"))
                .navigation("ledTeams", "leaders"),
        )
        .relation(
            RelationDef::new("Team", "captain", "Adult", "captainOf", Cardinality::ManyToOne)
                .named("Captaincy"),
        )
        .build()
        .unwrap()
}

fn id(record: &Record) -> i64 {
    record.get("id").and_then(id_of).unwrap()
}

struct Fixture {
    host: Controller,
    kid: i64,
    ada: i64,
    old: i64,
    red: i64,
    blue: i64,
}

fn fixture() -> Fixture {
    let host = Controller::open(&schema(), vec![], &RuntimeSettings::default()).unwrap();
    let engine = host.engine();
    let kid = id(&engine.create("User", json!({"name": "kid", "age": 12})).unwrap());
    let ada = id(&engine.create("User", json!({"name": "ada", "age": 36})).unwrap());
    let old = id(&engine.create("User", json!({"name": "old", "age": 80})).unwrap());
    let red = id(&engine.create("Team", json!({"title": "red"})).unwrap());
    let blue = id(&engine.create("Team", json!({"title": "blue"})).unwrap());

    engine
        .add_relation_by_name_by_id("Membership", ada, red, json!({"role": "lead"}))
        .unwrap();
    engine
        .add_relation_by_name_by_id("Membership", ada, blue, Value::Null)
        .unwrap();
    engine
        .add_relation_by_name_by_id("Membership", kid, blue, Value::Null)
        .unwrap();
    engine
        .add_relation_by_name_by_id("Membership", old, blue, json!({"role": "lead"}))
        .unwrap();

    Fixture {
        host,
        kid,
        ada,
        old,
        red,
        blue,
    }
}

fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(id).collect()
}

#[test]
fn test_filtered_entity_equals_filtered_root_query() {
    let f = fixture();
    let engine = f.host.engine();

    let adults = engine
        .find("Adult", None, None, &AttributeQuery::fields(["name"]))
        .unwrap();
    let direct = engine
        .find(
            "User",
            Some(MatchExp::atom("age", Operator::Gte, 18)),
            None,
            &AttributeQuery::fields(["name"]),
        )
        .unwrap();
    assert_eq!(adults, direct);
    assert_eq!(ids(&adults), vec![f.ada, f.old]);
}

#[test]
fn test_filter_chain() {
    let f = fixture();
    let engine = f.host.engine();
    let seniors = engine
        .find("Senior", None, None, &AttributeQuery::new())
        .unwrap();
    assert_eq!(ids(&seniors), vec![f.old]);

    let matched = engine
        .find(
            "Senior",
            Some(MatchExp::eq("name", "ada")),
            None,
            &AttributeQuery::new(),
        )
        .unwrap();
    assert!(matched.is_empty());
}

#[test]
fn test_membership_follows_updates() {
    let f = fixture();
    let engine = f.host.engine();

    engine
        .update("User", MatchExp::id(f.kid), json!({"age": 18}))
        .unwrap();
    let adults = engine.find("Adult", None, None, &AttributeQuery::new()).unwrap();
    assert_eq!(ids(&adults), vec![f.kid, f.ada, f.old]);

    engine
        .update("User", MatchExp::id(f.ada), json!({"age": 17}))
        .unwrap();
    let adults = engine.find("Adult", None, None, &AttributeQuery::new()).unwrap();
    assert_eq!(ids(&adults), vec![f.kid, f.old]);
}

#[test]
fn test_writes_through_filtered_entity_touch_members_only() {
    let f = fixture();
    let engine = f.host.engine();

    let updated = engine
        .update("Adult", MatchExp::atom("age", Operator::Lt, 100), json!({"name": "grown"}))
        .unwrap();
    assert_eq!(ids(&updated), vec![f.ada, f.old]);

    let kid = engine
        .find_one("User", Some(MatchExp::id(f.kid)), None, &AttributeQuery::fields(["name"]))
        .unwrap()
        .unwrap();
    assert_eq!(kid["name"], "kid");

    let deleted = engine.delete("Senior", MatchExp::eq("name", "grown")).unwrap();
    assert_eq!(ids(&deleted), vec![f.old]);
    let users = engine.find("User", None, None, &AttributeQuery::new()).unwrap();
    assert_eq!(ids(&users), vec![f.kid, f.ada]);
}

#[test]
fn test_filtered_relation_navigation() {
    let f = fixture();
    let engine = f.host.engine();

    let ada = engine
        .find_one(
            "User",
            Some(MatchExp::id(f.ada)),
            None,
            &AttributeQuery::new()
                .nest("ledTeams", AttributeQuery::fields(["title"]))
                .nest("teams", AttributeQuery::fields(["title"])),
        )
        .unwrap()
        .unwrap();
    assert_eq!(ada["ledTeams"], json!([{"id": f.red, "title": "red"}]));
    assert_eq!(ada["teams"].as_array().unwrap().len(), 2);

    let blue = engine
        .find_one(
            "Team",
            Some(MatchExp::id(f.blue)),
            None,
            &AttributeQuery::new().nest("leaders", AttributeQuery::fields(["name"])),
        )
        .unwrap()
        .unwrap();
    assert_eq!(blue["leaders"], json!([{"id": f.old, "name": "old"}]));
}

#[test]
fn test_filtered_relation_records() {
    let f = fixture();
    let engine = f.host.engine();
    let leads = engine
        .find_relation_by_name(
            "Leadership",
            None,
            None,
            &AttributeQuery::fields(["role", "source", "target"]),
        )
        .unwrap();
    assert_eq!(leads.len(), 2);
    assert!(leads.iter().all(|l| l["role"] == "lead"));

    // Demoting a lead moves the link out of the filtered relation.
    engine
        .update_relation_by_name(
            "Membership",
            MatchExp::eq("source", f.old),
            json!({"role": "member"}),
        )
        .unwrap();
    let leads = engine
        .find_relation_by_name("Leadership", None, None, &AttributeQuery::fields(["source"]))
        .unwrap();
    assert_eq!(leads.len(), 1);
    assert_eq!(leads[0]["source"], json!({"id": f.ada}));
}

#[test]
fn test_match_through_filtered_navigation() {
    let f = fixture();
    let engine = f.host.engine();
    let led = engine
        .find(
            "Team",
            Some(MatchExp::eq("leaders.name", "ada")),
            None,
            &AttributeQuery::fields(["title"]),
        )
        .unwrap();
    assert_eq!(ids(&led), vec![f.red]);
}

#[test]
fn test_path_joins_compose() {
    let f = fixture();
    let engine = f.host.engine();

    // Teammates of ada, found through a two-step path.
    let teammates = engine
        .find(
            "User",
            Some(MatchExp::eq("teams.members.name", "ada")),
            None,
            &AttributeQuery::new(),
        )
        .unwrap();

    // The same set, built one step at a time.
    let teams = engine
        .find("Team", Some(MatchExp::eq("members.name", "ada")), None, &AttributeQuery::new())
        .unwrap();
    let team_ids = json!(ids(&teams));
    let stepwise = engine
        .find(
            "User",
            Some(MatchExp::atom("teams.id", Operator::In, team_ids)),
            None,
            &AttributeQuery::new(),
        )
        .unwrap();

    assert_eq!(ids(&teammates), ids(&stepwise));
    assert_eq!(ids(&teammates), vec![f.kid, f.ada, f.old]);
}

#[test]
fn test_relation_to_filtered_entity() {
    let f = fixture();
    let engine = f.host.engine();

    engine
        .add_relation_by_name_by_id("Captaincy", f.red, f.ada, Value::Null)
        .unwrap();
    let err = engine
        .add_relation_by_name_by_id("Captaincy", f.blue, f.kid, Value::Null)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Mutation(MutationError::NotFound { id, .. }) if id == f.kid
    ));

    let red = engine
        .find_one(
            "Team",
            Some(MatchExp::id(f.red)),
            None,
            &AttributeQuery::new().nest("captain", AttributeQuery::fields(["name"])),
        )
        .unwrap()
        .unwrap();
    assert_eq!(red["captain"]["name"], "ada");

    // A captain who stops matching the filter drops out of the navigation.
    engine
        .update("User", MatchExp::id(f.ada), json!({"age": 10}))
        .unwrap();
    let red = engine
        .find_one(
            "Team",
            Some(MatchExp::id(f.red)),
            None,
            &AttributeQuery::new().nest("captain", AttributeQuery::fields(["name"])),
        )
        .unwrap()
        .unwrap();
    assert!(red["captain"].is_null());
}

#[test]
fn test_filtered_relation_on_both_hops_of_a_path() {
    let f = fixture();
    let engine = f.host.engine();

    // Leaders of teams led by "old", in one match expression.
    let chained = engine
        .find(
            "User",
            Some(MatchExp::eq("ledTeams.leaders.name", "old")),
            None,
            &AttributeQuery::new(),
        )
        .unwrap();
    let teams = engine
        .find("Team", Some(MatchExp::eq("leaders.name", "old")), None, &AttributeQuery::new())
        .unwrap();
    assert_eq!(ids(&teams), vec![f.blue]);
    let stepwise = engine
        .find(
            "User",
            Some(MatchExp::atom("ledTeams.id", Operator::In, json!(ids(&teams)))),
            None,
            &AttributeQuery::new(),
        )
        .unwrap();
    assert_eq!(ids(&chained), ids(&stepwise));
    assert_eq!(ids(&chained), vec![f.old]);

    // The same two hops as one nested attribute query.
    let ada = engine
        .find_one(
            "User",
            Some(MatchExp::id(f.ada)),
            None,
            &AttributeQuery::new().nest(
                "ledTeams",
                AttributeQuery::fields(["title"]).nest("leaders", AttributeQuery::fields(["name"])),
            ),
        )
        .unwrap()
        .unwrap();
    let red = engine
        .find_one(
            "Team",
            Some(MatchExp::id(f.red)),
            None,
            &AttributeQuery::fields(["title"]).nest("leaders", AttributeQuery::fields(["name"])),
        )
        .unwrap()
        .unwrap();
    assert_eq!(ada["ledTeams"], json!([Value::Object(red)]));
    assert_eq!(ada["ledTeams"][0]["leaders"], json!([{"id": f.ada, "name": "ada"}]));
}
