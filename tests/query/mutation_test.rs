//! Writes: validation, defaults, inline relations, links and emitted events.

use std::cell::RefCell;
use std::rc::Rc;

use relata::error::MutationError;
use relata::prelude::*;
use relata::query::id_of;
use serde_json::{json, Value};

fn schema() -> Schema {
    Schema::builder()
        .entity(
            EntityDef::new("Dormitory")
                .property(Property::string("name").required())
                .property(Property::string("status").default_value("open"))
                .property(Property::string("code").default_fn(|payload| {
                    let name = payload.get("name").and_then(Value::as_str).unwrap_or("");
                    Value::from(name.to_uppercase())
                })),
        )
        .entity(
            EntityDef::new("Bed")
                .property(Property::string("label"))
                .property(Property::number("price")),
        )
        .entity(EntityDef::new("User").property(Property::string("name").required()))
        .entity(EntityDef::new("Team").property(Property::string("title")))
        .relation(
            RelationDef::new("Dormitory", "beds", "Bed", "dormitory", Cardinality::OneToMany)
                .named("DormitoryBed"),
        )
        .relation(
            RelationDef::new("User", "bed", "Bed", "occupant", Cardinality::OneToOne)
                .named("UserBed"),
        )
        .relation(
            RelationDef::new("User", "teams", "Team", "members", Cardinality::ManyToMany)
                .named("Membership")
                .property(Property::string("role").default_value("member")),
        )
        .build()
        .unwrap()
}

type Log = Rc<RefCell<Vec<(String, MutationKind, i64)>>>;

fn host() -> (Controller, Log) {
    let host = Controller::open(&schema(), vec![], &RuntimeSettings::default()).unwrap();
    let log: Log = Rc::default();
    let sink = Rc::clone(&log);
    host.engine().listen("recorder", move |_, event| {
        sink.borrow_mut()
            .push((event.record_name.clone(), event.kind, event.record_id));
        Ok(Vec::new())
    });
    (host, log)
}

fn id(record: &Record) -> i64 {
    record.get("id").and_then(id_of).unwrap()
}

fn names(log: &Log) -> Vec<(String, MutationKind)> {
    log.borrow().iter().map(|(n, k, _)| (n.clone(), *k)).collect()
}

fn mutation_error(err: Error) -> MutationError {
    match err {
        Error::Mutation(e) => e,
        other => panic!("expected a mutation error, got {:?}", other),
    }
}

#[test]
fn test_create_applies_defaults() {
    let (host, _) = host();
    let dorm = host
        .engine()
        .create("Dormitory", json!({"name": "north"}))
        .unwrap();
    assert_eq!(dorm["status"], "open");
    assert_eq!(dorm["code"], "NORTH");

    let stored = host
        .engine()
        .find_one("Dormitory", Some(MatchExp::id(id(&dorm))), None, &AttributeQuery::all())
        .unwrap()
        .unwrap();
    assert_eq!(stored["status"], "open");
    assert_eq!(stored["code"], "NORTH");
}

#[test]
fn test_create_validation_errors() {
    let (host, log) = host();
    let engine = host.engine();

    let err = mutation_error(engine.create("Dormitory", json!({})).unwrap_err());
    assert!(matches!(err, MutationError::MissingRequired { ref property, .. } if property == "name"));

    let err = mutation_error(engine.create("Dormitory", json!({"name": null})).unwrap_err());
    assert!(matches!(err, MutationError::MissingRequired { .. }));

    let err = mutation_error(engine.create("Bed", json!({"price": "cheap"})).unwrap_err());
    assert!(matches!(err, MutationError::TypeMismatch { ref property, .. } if property == "price"));

    let err = mutation_error(engine.create("Bed", json!({"colour": "red"})).unwrap_err());
    assert!(matches!(err, MutationError::UnknownKey { ref key, .. } if key == "colour"));

    let err = mutation_error(engine.create("Bed", json!({"id": 7})).unwrap_err());
    assert!(matches!(err, MutationError::UnknownKey { .. }));

    let err = mutation_error(engine.create("Bed", json!([1, 2])).unwrap_err());
    assert!(matches!(err, MutationError::InvalidPayload { .. }));

    assert!(matches!(
        engine.create("Nobody", json!({})).unwrap_err(),
        Error::Query(_)
    ));
    assert!(log.borrow().is_empty());
}

#[test]
fn test_create_with_inline_payloads() {
    let (host, log) = host();
    let engine = host.engine();
    let dorm = engine
        .create(
            "Dormitory",
            json!({"name": "north", "beds": [{"label": "A"}, {"label": "B", "price": 10}]}),
        )
        .unwrap();

    let beds = engine
        .find(
            "Bed",
            Some(MatchExp::eq("dormitory.id", id(&dorm))),
            None,
            &AttributeQuery::fields(["label"]),
        )
        .unwrap();
    assert_eq!(beds.len(), 2);
    assert_eq!(
        names(&log),
        vec![
            ("Dormitory".to_string(), MutationKind::Create),
            ("Bed".to_string(), MutationKind::Create),
            ("DormitoryBed".to_string(), MutationKind::Create),
            ("Bed".to_string(), MutationKind::Create),
            ("DormitoryBed".to_string(), MutationKind::Create),
        ]
    );
}

#[test]
fn test_inline_reference_with_link_properties() {
    let (host, _) = host();
    let engine = host.engine();
    let team = engine.create("Team", json!({"title": "red"})).unwrap();
    let user = engine
        .create(
            "User",
            json!({"name": "ada", "teams": [{"id": id(&team), "&": {"role": "lead"}}, {"title": "blue"}]}),
        )
        .unwrap();

    let links = engine
        .find_relation_by_name(
            "Membership",
            Some(MatchExp::eq("source", id(&user))),
            None,
            &AttributeQuery::fields(["role"]).nest("target", AttributeQuery::fields(["title"])),
        )
        .unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(links[0]["role"], "lead");
    assert_eq!(links[1]["role"], "member");
    assert_eq!(links[1]["target"]["title"], "blue");
}

#[test]
fn test_failed_inline_write_rolls_back() {
    let (host, log) = host();
    let engine = host.engine();
    let err = engine
        .create("User", json!({"name": "ada", "bed": {"id": 999}}))
        .unwrap_err();
    assert!(matches!(
        mutation_error(err),
        MutationError::NotFound { id: 999, .. }
    ));

    let users = engine
        .find("User", None, None, &AttributeQuery::new())
        .unwrap();
    assert!(users.is_empty());
    assert!(log.borrow().is_empty());
}

#[test]
fn test_update_emits_changed_fields_only() {
    let (host, _) = host();
    let engine = host.engine();
    let bed = engine
        .create("Bed", json!({"label": "A", "price": 10}))
        .unwrap();

    let events: Rc<RefCell<Vec<MutationEvent>>> = Rc::default();
    let sink = Rc::clone(&events);
    engine.listen("updates", move |_, event| {
        if event.kind == MutationKind::Update {
            sink.borrow_mut().push(event.clone());
        }
        Ok(Vec::new())
    });

    let updated = engine
        .update("Bed", MatchExp::id(id(&bed)), json!({"label": "A", "price": 12}))
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["price"], json!(12));

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].changed_fields, vec!["price".to_string()]);
    assert_eq!(events[0].previous("price"), Some(&json!(10)));
    assert_eq!(events[0].get("price"), Some(&json!(12)));
}

#[test]
fn test_noop_update_is_suppressed() {
    let (host, log) = host();
    let engine = host.engine();
    let bed = engine.create("Bed", json!({"label": "A", "price": 10})).unwrap();
    log.borrow_mut().clear();

    let updated = engine
        .update("Bed", MatchExp::id(id(&bed)), json!({"label": "A", "price": 10.0}))
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert!(log.borrow().is_empty());
}

#[test]
fn test_update_many_rows() {
    let (host, log) = host();
    let engine = host.engine();
    for label in ["A", "B", "C"] {
        engine.create("Bed", json!({"label": label, "price": 5})).unwrap();
    }
    log.borrow_mut().clear();

    let updated = engine
        .update(
            "Bed",
            MatchExp::atom("label", Operator::In, json!(["A", "C"])),
            json!({"price": 7}),
        )
        .unwrap();
    assert_eq!(updated.len(), 2);
    assert_eq!(log.borrow().len(), 2);

    let err = mutation_error(
        engine
            .update("Bed", MatchExp::eq("label", "B"), json!({"price": "x"}))
            .unwrap_err(),
    );
    assert!(matches!(err, MutationError::TypeMismatch { .. }));
}

#[test]
fn test_update_relinks_one_navigation() {
    let (host, log) = host();
    let engine = host.engine();
    let first = engine.create("Bed", json!({"label": "A"})).unwrap();
    let second = engine.create("Bed", json!({"label": "B"})).unwrap();
    let user = engine
        .create("User", json!({"name": "ada", "bed": {"id": id(&first)}}))
        .unwrap();
    log.borrow_mut().clear();

    engine
        .update("User", MatchExp::id(id(&user)), json!({"bed": {"id": id(&second)}}))
        .unwrap();
    assert_eq!(
        names(&log),
        vec![
            ("UserBed".to_string(), MutationKind::Delete),
            ("UserBed".to_string(), MutationKind::Create),
        ]
    );

    let stored = engine
        .find_one(
            "User",
            Some(MatchExp::id(id(&user))),
            None,
            &AttributeQuery::new().nest("bed", AttributeQuery::fields(["label"])),
        )
        .unwrap()
        .unwrap();
    assert_eq!(stored["bed"]["label"], "B");

    // Pointing at the current target changes nothing.
    log.borrow_mut().clear();
    engine
        .update("User", MatchExp::id(id(&user)), json!({"bed": {"id": id(&second)}}))
        .unwrap();
    assert!(log.borrow().is_empty());

    engine
        .update("User", MatchExp::id(id(&user)), json!({"bed": null}))
        .unwrap();
    let stored = engine
        .find_one(
            "User",
            Some(MatchExp::id(id(&user))),
            None,
            &AttributeQuery::fields(["bed"]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(stored["bed"], Value::Null);
}

#[test]
fn test_update_rejects_many_navigation() {
    let (host, _) = host();
    let engine = host.engine();
    let dorm = engine.create("Dormitory", json!({"name": "north"})).unwrap();
    let err = mutation_error(
        engine
            .update("Dormitory", MatchExp::id(id(&dorm)), json!({"beds": []}))
            .unwrap_err(),
    );
    assert!(matches!(err, MutationError::InvalidPayload { .. }));
}

#[test]
fn test_delete_removes_links_first() {
    let (host, log) = host();
    let engine = host.engine();
    let dorm = engine
        .create("Dormitory", json!({"name": "north", "beds": [{"label": "A"}, {"label": "B"}]}))
        .unwrap();
    log.borrow_mut().clear();

    let deleted = engine.delete("Dormitory", MatchExp::id(id(&dorm))).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0]["name"], "north");
    assert_eq!(
        names(&log),
        vec![
            ("DormitoryBed".to_string(), MutationKind::Delete),
            ("DormitoryBed".to_string(), MutationKind::Delete),
            ("Dormitory".to_string(), MutationKind::Delete),
        ]
    );

    let beds = engine
        .find("Bed", None, None, &AttributeQuery::fields(["dormitory"]))
        .unwrap();
    assert_eq!(beds.len(), 2);
    assert!(beds.iter().all(|bed| bed["dormitory"].is_null()));
}

#[test]
fn test_delete_nothing_matches() {
    let (host, log) = host();
    let deleted = host
        .engine()
        .delete("Bed", MatchExp::eq("label", "missing"))
        .unwrap();
    assert!(deleted.is_empty());
    assert!(log.borrow().is_empty());
}

#[test]
fn test_relation_operations() {
    let (host, _) = host();
    let engine = host.engine();
    let user = engine.create("User", json!({"name": "ada"})).unwrap();
    let team = engine.create("Team", json!({"title": "red"})).unwrap();

    let link = engine
        .create(
            "Membership",
            json!({"source": {"id": id(&user)}, "target": {"id": id(&team)}, "role": "lead"}),
        )
        .unwrap();
    assert_eq!(link["source"], json!({"id": id(&user)}));
    assert_eq!(link["role"], "lead");

    let updated = engine
        .update(
            "Membership",
            MatchExp::id(id(&link)),
            json!({"role": "member"}),
        )
        .unwrap();
    assert_eq!(updated[0]["role"], "member");

    let err = mutation_error(
        engine
            .add_relation_by_name_by_id("Membership", id(&user), id(&team), json!({"rank": 1}))
            .unwrap_err(),
    );
    assert!(matches!(err, MutationError::UnknownKey { .. }));

    let removed = engine
        .remove_relation_by_name("Membership", MatchExp::eq("target.title", "red"))
        .unwrap();
    assert_eq!(removed.len(), 1);
    let left = engine
        .find_relation_by_name("Membership", None, None, &AttributeQuery::new())
        .unwrap();
    assert!(left.is_empty());
}

#[test]
fn test_link_to_missing_record() {
    let (host, _) = host();
    let engine = host.engine();
    let user = engine.create("User", json!({"name": "ada"})).unwrap();
    let err = mutation_error(
        engine
            .add_relation_by_name_by_id("Membership", id(&user), 404, Value::Null)
            .unwrap_err(),
    );
    assert!(matches!(err, MutationError::NotFound { id: 404, .. }));
}

#[test]
fn test_relation_operations_need_a_relation() {
    let (host, _) = host();
    let err = host
        .engine()
        .remove_relation_by_name("User", MatchExp::id(1))
        .unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}

#[test]
fn test_explicit_transaction_rolls_back() {
    let (host, _) = host();
    let engine = host.engine();
    let result: Result<()> = engine.transaction("batch", |engine| {
        engine.create("Team", json!({"title": "red"}))?;
        engine.create("Team", json!({"title": 5}))?;
        Ok(())
    });
    assert!(result.is_err());

    let teams = engine
        .find("Team", None, None, &AttributeQuery::new())
        .unwrap();
    assert!(teams.is_empty());
}
