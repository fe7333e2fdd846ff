use relata::prelude::*;
use relata::query::id_of;
use serde_json::{json, Value};

fn schema() -> Schema {
    Schema::builder()
        .entity(
            EntityDef::new("Dormitory")
                .property(Property::string("name"))
                .property(Property::number("capacity").required()),
        )
        .entity(EntityDef::new("Bed").property(Property::string("label")))
        .entity(
            EntityDef::new("User")
                .property(Property::string("name").required())
                .property(Property::boolean("vip").default_value(false)),
        )
        .relation(
            RelationDef::new("Dormitory", "beds", "Bed", "dormitory", Cardinality::OneToMany)
                .named("DormitoryBed"),
        )
        .relation(
            RelationDef::new("User", "bed", "Bed", "occupant", Cardinality::OneToOne)
                .named("UserBed"),
        )
        .build()
        .unwrap()
}

fn computations() -> Vec<Computation> {
    let beds = Transform::new("CreateBeds", "Bed", Trigger::created("Dormitory"), |event| {
        let capacity = event.get("capacity").and_then(Value::as_i64).unwrap_or(0);
        Value::Array(
            (1..=capacity)
                .map(|n| {
                    json!({
                        "label": format!("bed-{}", n),
                        "dormitory": {"id": event.record_id}
                    })
                })
                .collect(),
        )
    });

    let occupancy = StateMachine::property("BedOccupancy", "Bed", "isOccupied", false)
        .states([false, true])
        .transition(
            Transition::new(Trigger::created("UserBed"), true, |event| {
                event.end_id("target").map(TransitionTarget::Id)
            })
            .from(false),
        )
        .transition(
            Transition::new(Trigger::deleted("UserBed"), false, |event| {
                event.end_id("target").map(TransitionTarget::Id)
            })
            .from(true),
        );

    let occupied = Aggregate::count("DormitoryOccupancy", "Dormitory", "occupancy", "beds")
        .filter(MatchExp::eq("isOccupied", true));

    vec![beds.into(), occupancy.into(), occupied.into()]
}

fn host() -> Controller {
    Controller::open(&schema(), computations(), &RuntimeSettings::default()).unwrap()
}

fn id(record: &Record) -> i64 {
    record.get("id").and_then(id_of).unwrap()
}

fn occupancy(host: &Controller, dormitory: i64) -> Value {
    host.bound_state("DormitoryOccupancy")
        .unwrap()
        .get(host.engine(), dormitory)
        .unwrap()
        .unwrap()
}

#[test]
fn test_transform_creates_one_bed_per_capacity() {
    let host = host();
    let engine = host.engine();
    let dorm = engine
        .create("Dormitory", json!({"name": "North", "capacity": 4}))
        .unwrap();

    let beds = engine
        .find(
            "Bed",
            Some(MatchExp::eq("dormitory", id(&dorm))),
            Some(Modifier::new().order_by("id", Order::Asc)),
            &AttributeQuery::fields(["label", "isOccupied"]),
        )
        .unwrap();
    assert_eq!(beds.len(), 4);
    assert!(beds.iter().all(|bed| bed["isOccupied"] == json!(false)));
    assert_eq!(beds[0]["label"], "bed-1");
    assert_eq!(occupancy(&host, id(&dorm)), json!(0));
    assert!(host.take_failures().is_empty());
}

#[test]
fn test_assigning_user_updates_bed_and_dormitory() {
    let host = host();
    let engine = host.engine();
    let dorm = engine
        .create("Dormitory", json!({"name": "North", "capacity": 4}))
        .unwrap();
    let bed = engine
        .find_one(
            "Bed",
            Some(MatchExp::eq("label", "bed-2")),
            None,
            &AttributeQuery::new(),
        )
        .unwrap()
        .unwrap();
    let user = engine.create("User", json!({"name": "ada"})).unwrap();

    engine
        .add_relation_by_name_by_id("UserBed", id(&user), id(&bed), Value::Null)
        .unwrap();

    // Derived state is visible as soon as the call returns.
    let stored = engine
        .find_one(
            "Bed",
            Some(MatchExp::id(id(&bed))),
            None,
            &AttributeQuery::fields(["isOccupied"]).nest("occupant", AttributeQuery::fields(["name"])),
        )
        .unwrap()
        .unwrap();
    assert_eq!(stored["isOccupied"], json!(true));
    assert_eq!(stored["occupant"]["name"], "ada");
    assert_eq!(occupancy(&host, id(&dorm)), json!(1));

    engine
        .remove_relation_by_name("UserBed", MatchExp::eq("source", id(&user)))
        .unwrap();
    let stored = engine
        .find_one("Bed", Some(MatchExp::id(id(&bed))), None, &AttributeQuery::all())
        .unwrap()
        .unwrap();
    assert_eq!(stored["isOccupied"], json!(false));
    assert_eq!(occupancy(&host, id(&dorm)), json!(0));
    assert!(host.take_failures().is_empty());
}

#[test]
fn test_occupancy_matches_direct_count() {
    let host = host();
    let engine = host.engine();
    let dorm = engine
        .create("Dormitory", json!({"name": "South", "capacity": 3}))
        .unwrap();
    let beds = engine
        .find("Bed", None, None, &AttributeQuery::new())
        .unwrap();

    for (n, bed) in beds.iter().take(2).enumerate() {
        let user = engine
            .create("User", json!({"name": format!("user-{}", n), "bed": {"id": id(bed)}}))
            .unwrap();
        assert!(user.get("id").is_some());
    }

    let occupied = engine
        .find(
            "Bed",
            Some(MatchExp::eq("dormitory", id(&dorm)).and(MatchExp::eq("isOccupied", true))),
            None,
            &AttributeQuery::new(),
        )
        .unwrap();
    assert_eq!(occupied.len(), 2);
    assert_eq!(occupancy(&host, id(&dorm)), json!(2));

    // Deleting an occupant removes the link first, which frees the bed.
    engine
        .delete("User", MatchExp::eq("name", "user-0"))
        .unwrap();
    assert_eq!(occupancy(&host, id(&dorm)), json!(1));
}

#[test]
fn test_state_machine_is_idempotent() {
    let host = host();
    let engine = host.engine();
    engine
        .create("Dormitory", json!({"name": "East", "capacity": 1}))
        .unwrap();
    let bed = engine
        .find_one("Bed", None, None, &AttributeQuery::new())
        .unwrap()
        .unwrap();
    let user = engine.create("User", json!({"name": "bo"})).unwrap();
    let link = engine
        .add_relation_by_name_by_id("UserBed", id(&user), id(&bed), Value::Null)
        .unwrap();

    let updates = std::rc::Rc::new(std::cell::Cell::new(0));
    let seen = std::rc::Rc::clone(&updates);
    engine.listen("bed-updates", move |_, event| {
        if event.record_name == "Bed" && event.kind == MutationKind::Update {
            seen.set(seen.get() + 1);
        }
        Ok(Vec::new())
    });

    // Re-deliver the link's create event: the bed is already occupied.
    let replay = MutationEvent::new("UserBed", MutationKind::Create, id(&link), link.clone());
    engine.bus().publish(engine, vec![replay]);
    assert_eq!(updates.get(), 0);

    let stored = engine
        .find_one("Bed", Some(MatchExp::id(id(&bed))), None, &AttributeQuery::all())
        .unwrap()
        .unwrap();
    assert_eq!(stored["isOccupied"], json!(true));
}

#[test]
fn test_one_to_one_rejects_second_occupant() {
    let host = host();
    let engine = host.engine();
    engine
        .create("Dormitory", json!({"name": "West", "capacity": 1}))
        .unwrap();
    let bed = engine
        .find_one("Bed", None, None, &AttributeQuery::new())
        .unwrap()
        .unwrap();
    let first = engine.create("User", json!({"name": "a"})).unwrap();
    let second = engine.create("User", json!({"name": "b"})).unwrap();

    engine
        .add_relation_by_name_by_id("UserBed", id(&first), id(&bed), Value::Null)
        .unwrap();
    let err = engine
        .add_relation_by_name_by_id("UserBed", id(&second), id(&bed), Value::Null)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Mutation(relata::error::MutationError::Cardinality { .. })
    ));
}

#[test]
fn test_count_filtered_through_a_second_relation() {
    let mut computations = computations();
    computations.push(
        Aggregate::count("VipBeds", "Dormitory", "vipBeds", "beds")
            .filter(MatchExp::eq("occupant.vip", true))
            .into(),
    );
    let host = Controller::open(&schema(), computations, &RuntimeSettings::default()).unwrap();
    let engine = host.engine();
    let dorm = id(&engine
        .create("Dormitory", json!({"name": "North", "capacity": 2}))
        .unwrap());
    let beds = engine
        .find("Bed", None, Some(Modifier::new().order_by("id", Order::Asc)), &AttributeQuery::new())
        .unwrap();
    let vip = id(&engine.create("User", json!({"name": "ada", "vip": true})).unwrap());
    let plain = id(&engine.create("User", json!({"name": "bo"})).unwrap());

    let vip_beds = || {
        host.bound_state("VipBeds")
            .unwrap()
            .get(engine, dorm)
            .unwrap()
            .unwrap()
    };
    let direct = || {
        engine
            .find(
                "Bed",
                Some(MatchExp::eq("dormitory", dorm).and(MatchExp::eq("occupant.vip", true))),
                None,
                &AttributeQuery::new(),
            )
            .unwrap()
            .len() as i64
    };

    engine
        .add_relation_by_name_by_id("UserBed", vip, id(&beds[0]), Value::Null)
        .unwrap();
    engine
        .add_relation_by_name_by_id("UserBed", plain, id(&beds[1]), Value::Null)
        .unwrap();
    assert_eq!(vip_beds(), json!(1));
    assert_eq!(direct(), 1);

    // A change two hops out reaches the owner.
    engine
        .update("User", MatchExp::id(plain), json!({"vip": true}))
        .unwrap();
    assert_eq!(vip_beds(), json!(2));
    assert_eq!(direct(), 2);

    engine
        .remove_relation_by_name("UserBed", MatchExp::eq("source", vip))
        .unwrap();
    assert_eq!(vip_beds(), json!(1));

    engine.delete("User", MatchExp::id(plain)).unwrap();
    assert_eq!(vip_beds(), json!(0));
    assert_eq!(direct(), 0);
    assert!(host.take_failures().is_empty());
}

#[test]
fn test_filter_with_unknown_path_fails_setup() {
    let mut computations = computations();
    computations.push(
        Aggregate::count("Broken", "Dormitory", "broken", "beds")
            .filter(MatchExp::eq("occupant.missing", true))
            .into(),
    );
    let err = Controller::open(&schema(), computations, &RuntimeSettings::default()).unwrap_err();
    assert!(matches!(err, Error::Schema(_)));
}
