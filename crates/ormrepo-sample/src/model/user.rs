use ormrepo::Entity;
use serde::{Deserialize, Serialize};

fn default_active() -> bool {
    true
}

/// A registered user, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    pub age: i64,
    /// Not exposed through [`UserDto`]; new users start active.
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Entity for User {
    type Id = i64;
    const TABLE: &'static str = "users";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &["id", "name", "email", "age", "active"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

/// What callers send and receive for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    pub age: i64,
}

impl UserDto {
    pub fn new(name: impl Into<String>, email: impl Into<String>, age: i64) -> Self {
        Self {
            id: None,
            name: name.into(),
            email: email.into(),
            age,
        }
    }
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            age: user.age,
        }
    }
}
