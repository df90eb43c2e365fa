pub mod invite_links;
pub mod sessions;
pub mod users;
