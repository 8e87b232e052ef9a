pub mod user_repo;
pub use user_repo::UserRepository;
pub mod profile_repo;
pub use profile_repo::PgProfileRepository;
pub mod membership_repo;
pub use membership_repo::PgMembershipRepository;
pub mod tenancy_repo;
pub use tenancy_repo::PgTenantDirectory;
