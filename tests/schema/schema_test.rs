//! Schema definition, validation and instantiation.

use relata::error::SchemaError;
use relata::prelude::*;
use relata::schema::{Direction, SchemaGraph};
use relata::storage::inject_columns;

fn dormitories() -> Schema {
    Schema::builder()
        .entity(EntityDef::new("Dormitory").property(Property::number("capacity")))
        .entity(EntityDef::new("Bed").property(Property::boolean("isOccupied")))
        .entity(EntityDef::filtered(
            "FreeBed",
            "Bed",
            MatchExp::eq("isOccupied", false),
        ))
        .relation(RelationDef::new(
            "Dormitory",
            "beds",
            "Bed",
            "dormitory",
            Cardinality::OneToMany,
        ))
        .build()
        .unwrap()
}

#[test]
fn test_default_relation_name() {
    let schema = dormitories();
    let graph = schema.graph();
    assert!(graph.relation("Dormitory_beds_dormitory_Bed").is_some());
    assert_eq!(graph.source("Dormitory_beds_dormitory_Bed"), Some("Dormitory"));
    assert_eq!(graph.target("Dormitory_beds_dormitory_Bed"), Some("Bed"));
}

#[test]
fn test_navigations_both_directions() {
    let schema = dormitories();
    let graph = schema.graph();

    let beds = graph.navigation("Dormitory", "beds").unwrap();
    assert_eq!(beds.entity, "Bed");
    assert_eq!(beds.direction, Direction::Forward);
    assert!(beds.many);

    let dorm = graph.navigation("Bed", "dormitory").unwrap();
    assert_eq!(dorm.entity, "Dormitory");
    assert_eq!(dorm.direction, Direction::Backward);
    assert!(!dorm.many);
}

#[test]
fn test_filtered_entity_inherits() {
    let schema = dormitories();
    let graph = schema.graph();

    assert!(graph.is_filtered("FreeBed"));
    assert_eq!(graph.root("FreeBed"), "Bed");
    assert!(graph.property("FreeBed", "isOccupied").is_some());
    assert!(graph.navigation("FreeBed", "dormitory").is_some());
    assert_eq!(graph.filter_chain("FreeBed").len(), 1);
}

#[test]
fn test_duplicate_record_name() {
    let err = Schema::builder()
        .entity(EntityDef::new("User"))
        .entity(EntityDef::new("User"))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateName(name) if name == "User"));
}

#[test]
fn test_reserved_property_names() {
    for name in ["id", "&", "a.b"] {
        let err = Schema::builder()
            .entity(EntityDef::new("User").property(Property::string(name)))
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedProperty { .. }), "{}", name);
    }
}

#[test]
fn test_duplicate_property() {
    let err = Schema::builder()
        .entity(
            EntityDef::new("User")
                .property(Property::string("name"))
                .property(Property::number("name")),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateProperty { .. }));
}

#[test]
fn test_navigation_clashes_with_property() {
    let err = Schema::builder()
        .entity(EntityDef::new("Dormitory").property(Property::string("beds")))
        .entity(EntityDef::new("Bed"))
        .relation(RelationDef::new(
            "Dormitory",
            "beds",
            "Bed",
            "dormitory",
            Cardinality::OneToMany,
        ))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        SchemaError::DuplicateProperty { ref record, ref property }
            if record == "Dormitory" && property == "beds"
    ));
}

#[test]
fn test_unknown_relation_end() {
    let err = Schema::builder()
        .entity(EntityDef::new("User"))
        .relation(RelationDef::new(
            "User",
            "team",
            "Team",
            "members",
            Cardinality::ManyToOne,
        ))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::UnknownRecord(name) if name == "Team"));
}

#[test]
fn test_filtered_entity_cannot_declare_properties() {
    let err = Schema::builder()
        .entity(EntityDef::new("Bed").property(Property::boolean("isOccupied")))
        .entity(
            EntityDef::filtered("FreeBed", "Bed", MatchExp::eq("isOccupied", false))
                .property(Property::string("label")),
        )
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::FilteredProperties { .. }));
}

#[test]
fn test_missing_base() {
    let err = Schema::builder()
        .entity(EntityDef::filtered("FreeBed", "Bed", MatchExp::eq("isOccupied", false)))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::MissingBase { .. }));
}

#[test]
fn test_filter_on_unknown_field() {
    let err = Schema::builder()
        .entity(EntityDef::new("Bed").property(Property::boolean("isOccupied")))
        .entity(EntityDef::filtered("FreeBed", "Bed", MatchExp::eq("missing", false)))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::FilterPath { .. }));
}

#[test]
fn test_filtered_relation_of_an_entity_is_rejected() {
    let err = Schema::builder()
        .entity(EntityDef::new("Bed"))
        .relation(RelationDef::filtered("Active", "Bed", MatchExp::eq("id", 1)))
        .build()
        .unwrap_err();
    assert!(matches!(err, SchemaError::NotARelation { .. }));
}

#[test]
fn test_instances_are_independent() {
    let schema = dormitories();
    let mut first = SchemaGraph::instantiate(&schema);
    let second = SchemaGraph::instantiate(&schema);

    inject_columns(
        &mut first,
        [("Dormitory".to_string(), Property::number("occupancy"))],
    )
    .unwrap();

    assert!(first.property("Dormitory", "occupancy").is_some());
    assert!(second.property("Dormitory", "occupancy").is_none());
    assert!(schema.graph().property("Dormitory", "occupancy").is_none());
    assert_eq!(first.names(), second.names());
}

#[test]
fn test_injected_column_on_filtered_owner_lands_on_root() {
    let schema = dormitories();
    let mut graph = SchemaGraph::instantiate(&schema);
    inject_columns(
        &mut graph,
        [("FreeBed".to_string(), Property::string("note"))],
    )
    .unwrap();
    assert!(graph.property("Bed", "note").is_some());
}

#[test]
fn test_injected_column_clashing_with_navigation() {
    let schema = dormitories();
    let mut graph = SchemaGraph::instantiate(&schema);
    let err = inject_columns(
        &mut graph,
        [("Dormitory".to_string(), Property::number("beds"))],
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateProperty { .. }));
}
