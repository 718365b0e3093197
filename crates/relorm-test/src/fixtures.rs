//! A small entity schema for integration tests.
//!
//! Owners have cars; a car has wheels, drivers through `car_drivers`, and
//! two polymorphic components (radio and liquid) stored in one
//! `components` table. Persons reference themselves: a parent, children,
//! and friends through `friendships`. Persons are soft-deleted.

use std::sync::Arc;

use relorm_db::model::{Entity, EntityDecl};
use relorm_db::value::ValueType;
use relorm_db::Orm;

use crate::override_settings::current_settings;
use crate::test_database::TestDatabase;

/// The SQLite schema the fixture entities map onto.
pub const SCHEMA: &str = r#"
CREATE TABLE owners (
    id INTEGER PRIMARY KEY,
    name VARCHAR(50) NOT NULL,
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE cars (
    id INTEGER PRIMARY KEY,
    owner_id INTEGER REFERENCES owners(id),
    brand VARCHAR(20) NOT NULL,
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE wheels (
    id INTEGER PRIMARY KEY,
    car_id INTEGER REFERENCES cars(id),
    brand VARCHAR(20)
);
CREATE TABLE drivers (
    id INTEGER PRIMARY KEY,
    name VARCHAR(50)
);
CREATE TABLE car_drivers (
    car_id INTEGER NOT NULL REFERENCES cars(id),
    driver_id INTEGER NOT NULL REFERENCES drivers(id),
    PRIMARY KEY (car_id, driver_id)
);
CREATE TABLE components (
    id INTEGER PRIMARY KEY,
    car_id INTEGER,
    car_type VARCHAR(20),
    brand VARCHAR(20)
);
CREATE TABLE persons (
    id INTEGER PRIMARY KEY,
    name VARCHAR(50),
    parent_id INTEGER REFERENCES persons(id),
    deleted_at DATETIME
);
CREATE TABLE friendships (
    person_id INTEGER NOT NULL REFERENCES persons(id),
    friend_id INTEGER NOT NULL REFERENCES persons(id),
    PRIMARY KEY (person_id, friend_id)
);
"#;

/// Creates a test database holding [`SCHEMA`].
pub fn database() -> TestDatabase {
    TestDatabase::with_schema(SCHEMA)
}

/// Builds an engine on `db` from the active [`current_settings`].
pub fn orm(db: &TestDatabase) -> Orm {
    Orm::new(current_settings()).with_executor(Arc::new(db.clone()))
}

/// A car owner.
pub struct Owner;

impl Entity for Owner {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Name", ValueType::Text, "")
            .many::<Car>("Cars", r#"validate:"dive""#)
            .base_model()
    }
}

/// A car.
pub struct Car;

impl Entity for Car {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("OwnerID", ValueType::Int, "")
            .scalar("Brand", ValueType::Text, r#"validate:"max=20""#)
            .optional_one::<Owner>("Owner", "")
            .many::<Wheel>("Wheels", "")
            .many::<Driver>("Drivers", "")
            .optional_one::<Component>("Radio", r#"polymorphic:"Car" polymorphic_value:"radio""#)
            .optional_one::<Component>("Liquid", r#"polymorphic:"Car" polymorphic_value:"liquid""#)
            .base_model()
    }
}

/// A wheel of a car.
pub struct Wheel;

impl Entity for Wheel {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("CarID", ValueType::Int, "")
            .scalar("Brand", ValueType::Text, "")
            .optional_one::<Car>("Car", "")
    }
}

/// A driver; many-to-many with cars.
pub struct Driver;

impl Entity for Driver {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Name", ValueType::Text, "")
    }
}

/// A car component, discriminated by `car_type`.
pub struct Component;

impl Entity for Component {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("CarID", ValueType::Int, "")
            .nullable("CarType", ValueType::Text, "")
            .scalar("Brand", ValueType::Text, "")
    }
}

/// A self-referencing, soft-deleted person.
pub struct Person;

impl Entity for Person {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Name", ValueType::Text, "")
            .nullable("ParentID", ValueType::Int, "")
            .nullable("DeletedAt", ValueType::DateTime, "")
            .optional_one::<Person>("Parent", "")
            .many::<Person>("Children", "")
            .many::<Person>("Friends", r#"orm:"join_table:friendships""#)
    }
}
