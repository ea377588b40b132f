pub mod oauth_token;
pub mod user;
pub mod user_account;
