//! Domain types and models

pub mod directory;
pub mod extsvc;
pub mod perms;
pub mod request;

pub use directory::{Repo, User};
pub use extsvc::{
    service_key, AccountSpec, ExternalAccount, ExternalRepoSpec, ExternalRepository,
    ExternalService, ExternalServiceKind,
};
pub use perms::{
    bitmap_of, Bitmap, ExternalAccountIds, ExternalUserPermissions, PermType, Perms,
    PermsMetrics, RepoPermissions, UserPermissions,
};
pub use request::{Priority, RepoId, RequestMeta, RequestType, UserId};
