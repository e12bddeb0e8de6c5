//! Roles, permissions and user memberships.

pub mod defaults;
pub mod membership;
pub mod resolver;
pub mod types;

pub use membership::{MembershipRelation, ReconcileReport};
pub use resolver::{RoleResolver, SeedReport};
pub use types::{CreateRole, NewPermission, Permission, Role, UpdateRole};
