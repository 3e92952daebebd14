use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserView {
    pub id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl UserView {
    pub fn new(id: impl Into<String>) -> Self {
        UserView {
            id: id.into(),
            username: None,
            display_name: None,
        }
    }

    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}
