pub mod basic;

pub use self::basic::{basic_auth_middleware, BasicAuthAccounts};
