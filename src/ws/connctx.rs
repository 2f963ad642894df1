use uuid::Uuid;

/// Identity of one connected client. The user id is minted per connection;
/// clients carry only a display username plus the room password.
#[derive(Debug, Clone)]
pub struct ConnCtx {
    pub conn_id: Uuid,
    pub user_id: String,
    pub username: String,
    /// Room this connection has joined, once authenticated.
    pub room: Option<String>,
}

impl ConnCtx {
    pub fn new() -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            user_id: Uuid::new_v4().to_string(),
            username: String::new(),
            room: None,
        }
    }
}

impl Default for ConnCtx {
    fn default() -> Self {
        Self::new()
    }
}
