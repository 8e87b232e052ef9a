pub mod auth_bootstrap;
pub mod inactivity;
pub mod providers;
pub mod session_store;
pub mod tenant_resolver;
