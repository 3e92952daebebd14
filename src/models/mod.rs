pub mod conversations;
pub mod users;
