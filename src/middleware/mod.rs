pub mod auth_context;
pub mod role_gate;
