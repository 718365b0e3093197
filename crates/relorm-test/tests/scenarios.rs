//! End-to-end loading and writing against in-memory SQLite.
//!
//! Each test builds a fresh fixture database, seeds it with raw SQL, and
//! drives the engine through the public `Instance` surface.

use relorm_core::OrmError;
use relorm_db::model::{Entity, EntityDecl, EntityType};
use relorm_db::query::Condition;
use relorm_db::value::{Value, ValueType};
use relorm_db::{DbExecutor, Instance, NodeId, Record};
use relorm_test::fixtures::{self, Car, Owner, Person, Wheel};
use relorm_test::{assert_num_queries, TestDatabase};

const CARS: &str = "
INSERT INTO owners (id, name) VALUES (1, 'John Doe');
INSERT INTO cars (id, owner_id, brand) VALUES (1, 1, 'BMW');
INSERT INTO wheels (id, car_id, brand) VALUES (1, 1, 'Goodyear'), (2, 1, 'Pirelli');
INSERT INTO drivers (id, name) VALUES (1, 'Pat'), (2, 'Tom');
INSERT INTO car_drivers (car_id, driver_id) VALUES (1, 1), (1, 2);
INSERT INTO components (id, car_id, car_type, brand) VALUES (1, 1, 'radio', 'AEG'), (2, 1, 'liquid', 'Molly');
";

fn seeded(sql: &str) -> TestDatabase {
    relorm_test::init_test_logging();
    let db = fixtures::database();
    db.backend().execute_batch(sql).unwrap();
    db
}

fn writes(db: &TestDatabase) -> Vec<String> {
    db.statements()
        .into_iter()
        .filter(|s| s.starts_with("INSERT") || s.starts_with("UPDATE") || s.starts_with("DELETE"))
        .collect()
}

fn count(db: &TestDatabase, sql: &str) -> i64 {
    db.backend().query_one(sql, &[]).unwrap().get("n").unwrap()
}

#[test]
fn test_find_one_loads_every_relation_kind() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();

    assert_num_queries(&db, 7, || car.first(Condition::new().eq("id", 1)).unwrap());

    let graph = car.graph();
    assert_eq!(car.get("Brand").unwrap(), &Value::from("BMW"));
    let owner = car.one("Owner").unwrap().unwrap();
    assert_eq!(graph.get(owner, "Name"), &Value::from("John Doe"));

    let wheels: Vec<&Value> = car
        .many("Wheels")
        .unwrap()
        .iter()
        .map(|w| graph.get(*w, "Brand"))
        .collect();
    assert_eq!(wheels, vec![&Value::from("Goodyear"), &Value::from("Pirelli")]);
    assert_eq!(car.many("Drivers").unwrap().len(), 2);
}

#[test]
fn test_polymorphic_has_one() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.first(Condition::new().eq("id", 1)).unwrap();

    let radio = car.one("Radio").unwrap().unwrap();
    let liquid = car.one("Liquid").unwrap().unwrap();
    assert_eq!(car.graph().get(radio, "Brand"), &Value::from("AEG"));
    assert_eq!(car.graph().get(liquid, "Brand"), &Value::from("Molly"));
}

#[test]
fn test_back_reference_is_the_loaded_ancestor() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.first(Condition::new().eq("id", 1)).unwrap();

    let root = car.root();
    let graph = car.graph();
    for &wheel in car.many("Wheels").unwrap() {
        assert_eq!(graph.one(wheel, "Car"), Some(root));
    }
    let owner = car.one("Owner").unwrap().unwrap();
    assert_eq!(graph.many(owner, "Cars"), &[root]);
}

#[test]
fn test_find_many_batches_many_to_many() {
    let db = seeded(
        "INSERT INTO cars (id, brand) VALUES (1, 'BMW'), (2, 'Audi');
         INSERT INTO drivers (id, name) VALUES (1, 'Pat'), (2, 'Tom'), (3, 'Ann');
         INSERT INTO car_drivers (car_id, driver_id) VALUES (1, 1), (1, 2), (2, 3);",
    );
    let orm = fixtures::orm(&db);
    let mut cars = orm.model::<Car>().unwrap();

    // cars, wheels, car_drivers, drivers, radio, liquid
    let nodes = assert_num_queries(&db, 6, || cars.all(Condition::new()).unwrap());
    assert_eq!(nodes.len(), 2);

    let selects = db.selects();
    let join: Vec<&String> = selects.iter().filter(|s| s.contains(r#"FROM "car_drivers""#)).collect();
    assert_eq!(
        join,
        vec![r#"SELECT "car_id", "driver_id" FROM "car_drivers" WHERE "car_id" IN (?, ?)"#]
    );
    let drivers: Vec<&String> = selects.iter().filter(|s| s.contains(r#"FROM "drivers""#)).collect();
    assert_eq!(drivers.len(), 1);
    assert!(drivers[0].contains(r#"WHERE "id" IN (?, ?, ?)"#));

    let graph = cars.graph();
    let names = |car| -> Vec<String> {
        graph
            .many(car, "Drivers")
            .iter()
            .map(|d| graph.get(*d, "Name").to_string())
            .collect()
    };
    assert_eq!(names(nodes[0]), vec!["Pat", "Tom"]);
    assert_eq!(names(nodes[1]), vec!["Ann"]);
}

#[test]
fn test_change_set_update() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.first(Condition::new().eq("id", 1)).unwrap();

    car.set("Brand", "BMW2").unwrap();
    let root = car.root();
    let kept = car.many("Wheels").unwrap()[0];
    let graph = car.graph_mut();
    let added = graph.add(EntityType::of::<Wheel>());
    graph.set(added, "Brand", "Michelin");
    graph.set_many(root, "Wheels", vec![kept, added]);

    db.reset_query_count();
    car.update(None).unwrap();

    let writes = writes(&db);
    assert_eq!(writes.len(), 3, "{writes:#?}");
    assert_eq!(writes[0], r#"UPDATE "cars" SET "brand" = ?, "updated_at" = ? WHERE "id" = ?"#);
    assert!(writes[1].starts_with(r#"INSERT INTO "wheels""#));
    assert_eq!(writes[2], r#"DELETE FROM "wheels" WHERE "id" IN (?)"#);

    assert_eq!(car.graph().get(added, "CarID"), &Value::Int(1));
    assert!(!car.graph().get(added, "ID").is_null());
    let brands = db
        .backend()
        .query("SELECT brand FROM wheels WHERE car_id = 1 ORDER BY id", &[])
        .unwrap();
    let brands: Vec<String> = brands.iter().map(|r| r.get("brand").unwrap()).collect();
    assert_eq!(brands, vec!["Goodyear", "Michelin"]);
}

#[test]
fn test_update_without_mutations_writes_nothing() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.first(Condition::new().eq("id", 1)).unwrap();

    db.reset_query_count();
    let changes = car.update(None).unwrap();
    assert!(changes.is_empty());
    assert!(writes(&db).is_empty());
}

#[test]
fn test_diff_is_idempotent_after_update() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.first(Condition::new().eq("id", 1)).unwrap();

    car.set("Brand", "Mini").unwrap();
    assert!(!car.diff().unwrap().is_empty());
    car.update(None).unwrap();
    assert!(car.diff().unwrap().is_empty());
}

#[test]
fn test_whitelist_with_dot_notation() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.set_whitelist(["Owner.Name"]);

    assert_num_queries(&db, 2, || car.first(Condition::new().eq("id", 1)).unwrap());

    assert_eq!(
        db.selects()[0],
        r#"SELECT "id", "owner_id", "created_at", "updated_at" FROM "cars" WHERE "id" = ? LIMIT 1"#
    );
    assert!(car.get("Brand").unwrap().is_null());
    assert_eq!(car.get("OwnerID").unwrap(), &Value::Int(1));
    let owner = car.one("Owner").unwrap().unwrap();
    assert_eq!(car.graph().get(owner, "Name"), &Value::from("John Doe"));
    assert!(!car.graph().node(owner).links.contains_key("Cars"));
    assert!(!car.graph().node(car.root()).links.contains_key("Wheels"));
}

#[test]
fn test_create_then_find_round_trip() {
    let db = seeded("INSERT INTO drivers (id, name) VALUES (7, 'Sam');");
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.assign(
        &Record::new()
            .set("Brand", "Tesla")
            .one("Owner", Record::new().set("Name", "Alice"))
            .many(
                "Wheels",
                vec![
                    Record::new().set("Brand", "Goodyear"),
                    Record::new().set("Brand", "Pirelli"),
                ],
            )
            .many("Drivers", vec![Record::new().set("ID", 7).set("Name", "Sam")])
            .one("Radio", Record::new().set("Brand", "Sony")),
    )
    .unwrap();
    car.create().unwrap();
    let id = car.get("ID").unwrap().clone();
    assert!(!id.is_null());
    assert!(car.get("CreatedAt").unwrap().as_datetime().is_some());
    assert!(car.get("UpdatedAt").unwrap().is_null());

    let mut loaded = orm.model::<Car>().unwrap();
    loaded.first(Condition::new().eq("id", id)).unwrap();
    let graph = loaded.graph();
    assert_eq!(loaded.get("Brand").unwrap(), &Value::from("Tesla"));
    assert_eq!(loaded.get("CreatedAt").unwrap(), car.get("CreatedAt").unwrap());
    assert!(loaded.get("UpdatedAt").unwrap().is_null());
    let owner = loaded.one("Owner").unwrap().unwrap();
    assert_eq!(graph.get(owner, "Name"), &Value::from("Alice"));
    assert_eq!(loaded.many("Wheels").unwrap().len(), 2);
    let drivers = loaded.many("Drivers").unwrap();
    assert_eq!(drivers.len(), 1);
    assert_eq!(graph.get(drivers[0], "ID"), &Value::Int(7));
    let radio = loaded.one("Radio").unwrap().unwrap();
    assert_eq!(graph.get(radio, "CarType"), &Value::from("radio"));
    assert!(loaded.one("Liquid").unwrap().is_none());
}

#[test]
fn test_failed_create_leaves_no_rows() {
    let db = seeded("");
    let orm = fixtures::orm(&db);
    let mut owner = orm.model::<Owner>().unwrap();
    owner
        .assign(
            &Record::new()
                .set("Name", "Alice")
                .many("Cars", vec![Record::new().set("Brand", "x".repeat(40))]),
        )
        .unwrap();
    let err = owner.create().unwrap_err();
    assert!(matches!(err, OrmError::ValidationFailed { ref field, .. } if field == "Brand"));
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM owners"), 0);
    assert_eq!(db.statements().last().map(String::as_str), Some("ROLLBACK"));
}

#[test]
fn test_hard_delete_removes_owned_rows() {
    let db = seeded(CARS);
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    car.first(Condition::new().eq("id", 1)).unwrap();
    car.delete(None).unwrap();

    for table in ["cars", "wheels", "car_drivers", "components"] {
        assert_eq!(count(&db, &format!("SELECT COUNT(*) AS n FROM {table}")), 0, "{table}");
    }
    // The owner and the drivers are not owned by the car.
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM owners"), 1);
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM drivers"), 2);
}

#[test]
fn test_soft_delete() {
    let db = seeded(
        "INSERT INTO persons (id, name) VALUES (1, 'Ann');
         INSERT INTO persons (id, name, parent_id) VALUES (2, 'Ben', 1);",
    );
    let orm = fixtures::orm(&db);
    let mut person = orm.model::<Person>().unwrap();
    person.set("ID", 1).unwrap();

    db.reset_query_count();
    person.delete(None).unwrap();

    assert_eq!(
        writes(&db),
        vec![r#"UPDATE "persons" SET "deleted_at" = ? WHERE "id" = ?"#]
    );
    assert!(db.statements().iter().all(|s| !s.starts_with("DELETE")));
    assert_eq!(
        count(&db, "SELECT COUNT(*) AS n FROM persons WHERE deleted_at IS NOT NULL"),
        1
    );
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM persons"), 2);
}

#[test]
fn test_parent_chain_terminates() {
    let db = seeded(
        "INSERT INTO persons (id, name) VALUES (1, 'Root');
         INSERT INTO persons (id, name, parent_id) VALUES (2, 'Mid', 1), (3, 'Leaf', 2);",
    );
    let orm = fixtures::orm(&db);
    let mut person = orm.model::<Person>().unwrap();
    person.first(Condition::new().eq("id", 3)).unwrap();

    let graph = person.graph();
    let mid = person.one("Parent").unwrap().unwrap();
    let root = graph.one(mid, "Parent").unwrap();
    assert_eq!(graph.get(mid, "Name"), &Value::from("Mid"));
    assert_eq!(graph.get(root, "Name"), &Value::from("Root"));
    assert_eq!(graph.one(root, "Parent"), None);
}

#[test]
fn test_cyclic_parents_are_an_infinity_loop() {
    let db = seeded(
        "PRAGMA foreign_keys=OFF;
         INSERT INTO persons (id, name, parent_id) VALUES (1, 'A', 2), (2, 'B', 1);
         PRAGMA foreign_keys=ON;",
    );
    let orm = fixtures::orm(&db);
    let mut person = orm.model::<Person>().unwrap();
    let err = person.first(Condition::new().eq("id", 1)).unwrap_err();
    assert!(matches!(err, OrmError::InfinityLoop { ref chain, .. } if chain == "Person.Parent"));
}

#[test]
fn test_find_one_missing_row() {
    let db = seeded("");
    let orm = fixtures::orm(&db);
    let mut car = orm.model::<Car>().unwrap();
    let err = car.first(Condition::new().eq("id", 42)).unwrap_err();
    assert!(err.is_not_found());
}

const BOARDS: &str = "
CREATE TABLE boards (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    created_at DATETIME NOT NULL,
    updated_at DATETIME
);
CREATE TABLE notes (
    id INTEGER PRIMARY KEY,
    board_id INTEGER REFERENCES boards(id),
    body TEXT NOT NULL,
    created_at DATETIME NOT NULL,
    updated_at DATETIME
);
";

struct Board;

impl Entity for Board {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Title", ValueType::Text, "")
            .many::<Note>("Notes", r#"validate:"dive""#)
            .base_model()
    }
}

struct Note;

impl Entity for Note {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("BoardID", ValueType::Int, "")
            .scalar("Body", ValueType::Text, "")
            .base_model()
    }
}

#[test]
fn test_create_stamps_not_null_created_at() {
    let db = TestDatabase::with_schema(BOARDS);
    let orm = fixtures::orm(&db);
    let mut note = orm.model::<Note>().unwrap();
    note.set("Body", "hi").unwrap();
    note.create().unwrap();

    assert!(note.get("CreatedAt").unwrap().as_datetime().is_some());
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM notes WHERE created_at IS NOT NULL"), 1);
}

#[test]
fn test_create_stamps_not_null_created_at_on_batched_children() {
    let db = TestDatabase::with_schema(BOARDS);
    let orm = fixtures::orm(&db);
    let mut board = orm.model::<Board>().unwrap();
    board
        .assign(
            &Record::new().set("Title", "Todo").many(
                "Notes",
                vec![Record::new().set("Body", "one"), Record::new().set("Body", "two")],
            ),
        )
        .unwrap();
    board.create().unwrap();

    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM boards WHERE created_at IS NOT NULL"), 1);
    assert_eq!(count(&db, "SELECT COUNT(*) AS n FROM notes WHERE created_at IS NOT NULL"), 2);
}

#[test]
fn test_not_null_body_is_still_required() {
    let db = TestDatabase::with_schema(BOARDS);
    let orm = fixtures::orm(&db);
    let mut note = orm.model::<Note>().unwrap();
    note.set("BoardID", 1).unwrap();
    let err = note.create().unwrap_err();
    assert!(matches!(err, OrmError::ValidationFailed { ref field, .. } if field == "Body"));
}

const FRIENDS: &str = "
INSERT INTO persons (id, name) VALUES (1, 'Ann'), (2, 'Ben'), (3, 'Cy');
INSERT INTO friendships (person_id, friend_id) VALUES (1, 2), (3, 1);
";

fn friend_names(person: &Instance<'_>, node: NodeId) -> Vec<String> {
    let graph = person.graph();
    let mut names: Vec<String> = graph
        .many(node, "Friends")
        .iter()
        .map(|f| graph.get(*f, "Name").to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_self_referencing_friends_load_from_both_sides() {
    let db = seeded(FRIENDS);
    let orm = fixtures::orm(&db);

    let mut ann = orm.model::<Person>().unwrap();
    ann.first(Condition::new().eq("id", 1)).unwrap();
    assert_eq!(friend_names(&ann, ann.root()), vec!["Ben", "Cy"]);

    for (id, expected) in [(2, "Ann"), (3, "Ann")] {
        let mut person = orm.model::<Person>().unwrap();
        person.first(Condition::new().eq("id", id)).unwrap();
        assert_eq!(friend_names(&person, person.root()), vec![expected], "person {id}");
    }
}

#[test]
fn test_self_referencing_friends_batched() {
    let db = seeded(FRIENDS);
    let orm = fixtures::orm(&db);
    let mut persons = orm.model::<Person>().unwrap();
    let nodes = persons.all(Condition::new()).unwrap();
    assert_eq!(nodes.len(), 3);

    let friendships: Vec<String> = db
        .selects()
        .into_iter()
        .filter(|s| s.contains(r#"FROM "friendships""#))
        .collect();
    assert_eq!(
        friendships,
        vec![
            r#"SELECT "person_id", "friend_id" FROM "friendships" WHERE ("person_id" IN (?, ?, ?) OR "friend_id" IN (?, ?, ?))"#
        ]
    );
    assert_eq!(friend_names(&persons, nodes[0]), vec!["Ben", "Cy"]);
    assert_eq!(friend_names(&persons, nodes[1]), vec!["Ann"]);
    assert_eq!(friend_names(&persons, nodes[2]), vec!["Ann"]);
}

#[test]
fn test_removing_friend_from_reverse_side() {
    let db = seeded(FRIENDS);
    let orm = fixtures::orm(&db);
    let mut cy = orm.model::<Person>().unwrap();
    cy.first(Condition::new().eq("id", 3)).unwrap();
    let root = cy.root();
    cy.graph_mut().set_many(root, "Friends", Vec::new());

    db.reset_query_count();
    cy.update(None).unwrap();

    assert_eq!(
        writes(&db),
        vec![
            r#"DELETE FROM "friendships" WHERE (("person_id" = ? AND "friend_id" IN (?)) OR ("friend_id" = ? AND "person_id" IN (?)))"#
        ]
    );
    let left = db
        .backend()
        .query("SELECT person_id, friend_id FROM friendships", &[])
        .unwrap();
    let left: Vec<(i64, i64)> = left
        .iter()
        .map(|r| (r.get("person_id").unwrap(), r.get("friend_id").unwrap()))
        .collect();
    assert_eq!(left, vec![(1, 2)]);
}

#[test]
fn test_friend_reached_through_two_branches() {
    let db = seeded(
        "INSERT INTO persons (id, name) VALUES (1, 'Ann'), (2, 'Ben');
         INSERT INTO persons (id, name, parent_id) VALUES (5, 'Kid', 1);
         INSERT INTO friendships (person_id, friend_id) VALUES (5, 2), (1, 2);",
    );
    let orm = fixtures::orm(&db);
    let mut ann = orm.model::<Person>().unwrap();
    ann.first(Condition::new().eq("id", 1)).unwrap();

    assert_eq!(friend_names(&ann, ann.root()), vec!["Ben"]);
    let kid = ann.many("Children").unwrap()[0];
    assert_eq!(friend_names(&ann, kid), vec!["Ben"]);
}
