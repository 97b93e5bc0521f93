mod dictionary;
mod primitive;

pub use dictionary::Dictionary;
pub use primitive::{Object, ObjectId};

/// Builds a `/Type /<name>` entry value.
pub fn name(value: &str) -> Object {
    Object::Name(value.to_string())
}
