pub mod amounts;
pub mod users;
pub mod withdrawals;

pub type UserId = i64;
pub type ChannelId = i64;
pub type ChatId = i64;
/// Money is kept in integer cents.
pub type Cents = i64;
