use std::fmt;

/// Roles an application can hold. Only `app-esi` unlocks the ESI gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    App,
    AppEsi,
    Other(String),
}

impl Role {
    pub fn parse(s: &str) -> Self {
        match s {
            "app" => Role::App,
            "app-esi" => Role::AppEsi,
            other => Role::Other(other.to_string()),
        }
    }
}

/// A registered third-party application.
#[derive(Debug, Clone)]
pub struct App {
    pub id: i64,
    pub name: String,
    /// Hex-encoded SHA-256 of the application secret.
    pub secret_hash: String,
    pub roles: Vec<Role>,
}

impl App {
    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }
}

impl fmt::Display for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application {} \"{}\"", self.id, self.name)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AppRow {
    pub id: i64,
    pub name: String,
    pub secret_hash: String,
    pub roles: Vec<String>,
}

impl From<AppRow> for App {
    fn from(row: AppRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            secret_hash: row.secret_hash,
            roles: row.roles.iter().map(|r| Role::parse(r)).collect(),
        }
    }
}
