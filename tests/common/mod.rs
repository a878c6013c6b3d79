#![allow(dead_code)]

use rust_mapper::{Entity, ManualRelation, Schema, SchemaOptions, SqliteBackend, TableBinding};
use std::sync::Arc;

pub const FIXTURE: &str = r#"
    CREATE TABLE "user" (
        id INTEGER PRIMARY KEY,
        username TEXT NOT NULL,
        password TEXT,
        is_admin BOOLEAN DEFAULT 0,
        date_created TEXT DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE user_prefs (user_id INTEGER, font TEXT, theme TEXT);
    CREATE TABLE role (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        date_created TEXT DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE user_role (
        user_id INTEGER,
        role_id INTEGER,
        date_created TEXT DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE message (
        uuid TEXT PRIMARY KEY,
        sender_id INTEGER,
        recipient_id INTEGER,
        "read" BOOLEAN DEFAULT 0,
        message TEXT
    );
    CREATE TABLE meta ("key" TEXT PRIMARY KEY, "value" TEXT);
    CREATE TABLE friend_list (
        user_id INTEGER,
        friend_id INTEGER,
        PRIMARY KEY (user_id, friend_id)
    );

    INSERT INTO "user" (id, username, password, is_admin) VALUES
        (1, 'fred', '1234', 0),
        (2, 'billy', 'a', 'FALSE'),
        (3, 'annie', '12ab', 1),
        (4, 'robert', '123456', 0),
        (5, 'jimmy', 'a', 0),
        (6, 'sally', '123xyz', 0),
        (7, 'tom', 'qwerty', 0);
    INSERT INTO user_prefs (user_id, font, theme) VALUES
        (1, 'comic sans', 'dark'),
        (2, 'helvetica', 'light');
    INSERT INTO role (id, name) VALUES
        (1, 'Free User'),
        (2, 'Paid User'),
        (3, 'Administrator');
    INSERT INTO user_role (user_id, role_id) VALUES (1, 1), (5, 1), (2, 2), (4, 3);
    INSERT INTO message (uuid, sender_id, recipient_id, "read", message) VALUES
        ('m1', 5, 1, 1, 'hi fred'),
        ('m2', 5, 2, 0, 'hi billy'),
        ('m3', 5, 3, 0, 'hi annie'),
        ('m4', 1, 5, 1, 'hi jimmy'),
        ('m5', 2, 5, 0, 'yo jimmy'),
        ('m6', 1, 2, 0, 'hey billy');
    INSERT INTO friend_list (user_id, friend_id) VALUES (1, 2), (1, 3), (5, 1);
"#;

/// Gives messages a sender and a recipient, both pointing at `user`.
pub struct MessageBinding;

impl TableBinding for MessageBinding {
    fn name(&self) -> &str {
        "message"
    }

    fn manual_relations(&self) -> Vec<ManualRelation> {
        vec![
            ManualRelation::new("sender", "user", "message.sender_id", "user.id")
                .local_has_one("sender")
                .foreign_has_many("sent_messages"),
            ManualRelation::new("recipient", "user", "message.recipient_id", "user.id")
                .local_has_one("recipient")
                .foreign_has_many("received_messages"),
        ]
    }
}

pub async fn seeded_backend() -> Arc<SqliteBackend> {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend.execute_batch(FIXTURE).await.unwrap();
    Arc::new(backend)
}

pub async fn schema() -> Schema {
    schema_with(SchemaOptions::default()).await
}

pub async fn schema_with(options: SchemaOptions) -> Schema {
    Schema::builder(seeded_backend().await, options)
        .unwrap()
        .bind("message", Arc::new(MessageBinding))
        .initialize()
        .await
        .unwrap()
}

/// Sorted usernames, for order-independent comparisons.
pub fn usernames(entities: &[Entity]) -> Vec<String> {
    let mut names: Vec<String> = entities
        .iter()
        .filter_map(|e| e.get_str("username").map(str::to_string))
        .collect();
    names.sort();
    names
}
