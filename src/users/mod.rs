pub mod memory;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod validation;

pub use repo::{PgUserStore, StoreError, UserStore};
pub use repo_types::{User, UserCandidate};
pub use services::{delete_user, register, update_user, Registration, UserError, UserUpdate};
pub use validation::{validate, Field, Violation, ViolationKind, Violations};
