//! Shared schemas for the crate's tests: a small forum domain covering
//! every field shape, and a deliberately broken computed-field pair.

use relic_schema::{
    builder::{EntityFragment, Schema, SchemaBuilder},
    descriptor::Field,
    value::Value,
};

/// Forum domain:
/// - `Thread.messages` many <-> `Message.thread` one (inverse pair)
/// - `Message.author` one -> `User`, required, no inverse (backref path)
/// - `User.profile` one <-> `Profile.owner` one (single-valued pair)
/// - `Vote` carries a composite identity
pub fn forum_schema() -> Schema {
    SchemaBuilder::new()
        .fragment(
            EntityFragment::new("Thread")
                .identity(["id"])
                .field(Field::attr("id"))
                .field(Field::attr("name").default(""))
                .field(Field::many("messages", "Message").inverse("thread"))
                .field(Field::computed("message_count", |r| {
                    match r.read("messages") {
                        Value::List(items) => Value::Int(items.len() as i64),
                        _ => Value::Int(0),
                    }
                })),
        )
        .fragment(
            EntityFragment::new("Message")
                .identity(["id"])
                .field(Field::attr("id"))
                .field(Field::attr("body").default(""))
                .field(Field::one("thread", "Thread").inverse("messages"))
                .field(Field::one("author", "User").required()),
        )
        .fragment(
            EntityFragment::new("User")
                .identity(["id"])
                .field(Field::attr("id"))
                .field(Field::attr("name").default(""))
                .field(Field::one("profile", "Profile").inverse("owner")),
        )
        .fragment(
            EntityFragment::new("Profile")
                .identity(["id"])
                .field(Field::attr("id"))
                .field(Field::attr("bio").default(""))
                .field(Field::one("owner", "User").inverse("profile")),
        )
        .fragment(
            EntityFragment::new("Vote")
                .identity(["message_id", "user_id"])
                .field(Field::attr("message_id"))
                .field(Field::attr("user_id"))
                .field(Field::attr("score").default(0)),
        )
        .build()
        .expect("forum fixture schema must build")
}

/// Two computed fields that read each other. Building the schema is
/// legal; the cycle only exists at evaluation time.
pub fn cyclic_schema() -> Schema {
    SchemaBuilder::new()
        .fragment(
            EntityFragment::new("Loop")
                .identity(["id"])
                .field(Field::attr("id"))
                .field(Field::computed("x", |r| r.read("y")))
                .field(Field::computed("y", |r| r.read("x"))),
        )
        .build()
        .expect("cyclic fixture schema must build")
}
