mod claims;
mod jwt;

pub use claims::{Claims, Role};
pub use jwt::JwtValidator;
