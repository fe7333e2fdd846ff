//! Schema compiler integration tests: storage strategies and emitted DDL.

use insta::assert_snapshot;
use relata::prelude::*;
use relata::schema::SchemaGraph;
use relata::sql::Dialect;
use relata::storage::{compile, create_tables, inject_columns, RelationStorage};
use sqlparser::dialect::{PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

fn validate(sql: &str, dialect: Dialect) {
    let parser: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
    };
    if let Err(e) = Parser::parse_sql(&*parser, sql) {
        panic!("invalid SQL for {:?}: {}\n{}", dialect, e, sql);
    }
}

fn campus() -> Schema {
    Schema::builder()
        .entity(
            EntityDef::new("Dormitory")
                .property(Property::string("name").required())
                .property(Property::number("capacity")),
        )
        .entity(EntityDef::new("Bed").property(Property::string("label")))
        .entity(EntityDef::new("User").property(Property::string("name").required()))
        .entity(EntityDef::new("Deduction").property(Property::number("points")))
        .relation(
            RelationDef::new("Dormitory", "beds", "Bed", "dormitory", Cardinality::OneToMany)
                .named("DormitoryBed"),
        )
        .relation(
            RelationDef::new("User", "bed", "Bed", "occupant", Cardinality::OneToOne)
                .named("UserBed"),
        )
        .relation(
            RelationDef::new("User", "deductions", "Deduction", "users", Cardinality::ManyToMany)
                .named("UserDeduction")
                .property(Property::boolean("active").default_value(true)),
        )
        .relation(
            RelationDef::new("User", "leader", "User", "followers", Cardinality::ManyToOne)
                .named("UserLeader"),
        )
        .build()
        .unwrap()
}

#[test]
fn test_merged_and_join_storage() {
    let graph = SchemaGraph::instantiate(&campus());
    let map = compile(&graph).unwrap();

    let beds = map.relation("DormitoryBed").unwrap();
    assert_eq!(beds.storage, RelationStorage::MergedIntoTarget);
    assert_eq!(beds.fk_column(), Some("dormitory_id"));

    let occupant = map.relation("UserBed").unwrap();
    assert_eq!(occupant.storage, RelationStorage::MergedIntoSource);
    assert_eq!(occupant.table, "user");

    let leader = map.relation("UserLeader").unwrap();
    assert_eq!(leader.storage, RelationStorage::MergedIntoSource);
    assert_eq!(leader.fk_column(), Some("leader_id"));

    let deductions = map.relation("UserDeduction").unwrap();
    assert_eq!(deductions.storage, RelationStorage::JoinTable);
    assert_eq!(deductions.table, "user_deduction");
    assert!(deductions.column("active").is_some());
}

#[test]
fn test_entity_table_ddl() {
    let graph = SchemaGraph::instantiate(&campus());
    let map = compile(&graph).unwrap();
    let tables = create_tables(&graph, &map, false);
    let bed = tables.iter().find(|t| t.name == "bed").unwrap();

    let sql = bed.to_sql(Dialect::Sqlite);
    assert_snapshot!(sql, @r#"
    CREATE TABLE "bed" (
      "id" INTEGER PRIMARY KEY AUTOINCREMENT,
      "label" TEXT,
      "dormitory_id" INTEGER
    )
    "#);
    validate(&sql, Dialect::Sqlite);
}

#[test]
fn test_required_column_is_not_null() {
    let graph = SchemaGraph::instantiate(&campus());
    let map = compile(&graph).unwrap();
    let tables = create_tables(&graph, &map, false);
    let dorm = tables.iter().find(|t| t.name == "dormitory").unwrap();

    let sql = dorm.to_sql(Dialect::Sqlite);
    assert!(sql.contains("\"name\" TEXT NOT NULL"));
    assert!(sql.contains("\"capacity\" NUMERIC"));
}

#[test]
fn test_join_table_ddl() {
    let graph = SchemaGraph::instantiate(&campus());
    let map = compile(&graph).unwrap();
    let tables = create_tables(&graph, &map, true);
    let join = tables.iter().find(|t| t.name == "user_deduction").unwrap();

    let sql = join.to_sql(Dialect::Sqlite);
    assert_snapshot!(sql, @r#"
    CREATE TABLE IF NOT EXISTS "user_deduction" (
      "id" INTEGER PRIMARY KEY AUTOINCREMENT,
      "source_id" INTEGER NOT NULL,
      "target_id" INTEGER NOT NULL,
      "active" INTEGER
    )
    "#);
    validate(&sql, Dialect::Sqlite);
}

#[test]
fn test_every_table_parses_in_both_dialects() {
    let graph = SchemaGraph::instantiate(&campus());
    let map = compile(&graph).unwrap();
    let tables = create_tables(&graph, &map, true);
    assert_eq!(tables.len(), 5);

    for table in &tables {
        validate(&table.to_sql(Dialect::Sqlite), Dialect::Sqlite);
        validate(&table.to_sql(Dialect::Postgres), Dialect::Postgres);
    }
}

#[test]
fn test_one_to_one_fk_is_unique() {
    let graph = SchemaGraph::instantiate(&campus());
    let map = compile(&graph).unwrap();
    let tables = create_tables(&graph, &map, false);
    let user = tables.iter().find(|t| t.name == "user").unwrap();

    let sql = user.to_sql(Dialect::Sqlite);
    assert!(sql.contains("\"bed_id\" INTEGER UNIQUE"));
    assert!(sql.contains("\"leader_id\" INTEGER,") || sql.contains("\"leader_id\" INTEGER\n"));
}

#[test]
fn test_injected_column_in_ddl() {
    let mut graph = SchemaGraph::instantiate(&campus());
    inject_columns(
        &mut graph,
        [(
            "Dormitory".to_string(),
            Property::number("occupancy").default_value(0),
        )],
    )
    .unwrap();
    let map = compile(&graph).unwrap();
    let tables = create_tables(&graph, &map, false);
    let dorm = tables.iter().find(|t| t.name == "dormitory").unwrap();
    assert!(dorm.to_sql(Dialect::Sqlite).contains("\"occupancy\" NUMERIC"));
}

#[test]
fn test_filtered_records_have_no_storage() {
    let schema = Schema::builder()
        .entity(EntityDef::new("Bed").property(Property::boolean("isOccupied")))
        .entity(EntityDef::filtered(
            "FreeBed",
            "Bed",
            MatchExp::eq("isOccupied", false),
        ))
        .build()
        .unwrap();
    let graph = SchemaGraph::instantiate(&schema);
    let map = compile(&graph).unwrap();

    assert_eq!(map.tables().len(), 1);
    assert_eq!(map.entity_table(&graph, "FreeBed").unwrap().table, "bed");
}

#[test]
fn test_setup_reports_ddl() {
    let host = Controller::open(&campus(), vec![], &RuntimeSettings::default()).unwrap();
    let names: Vec<_> = host.ddl().iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"user_deduction"));
    assert!(names.contains(&"dormitory"));
}
