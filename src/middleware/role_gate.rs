//! Page-level authorization: every protected page prefix belongs to a set of
//! roles, and a caller landing outside their area is sent to their own home.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::middleware::auth_context::AuthContext;
use crate::models::{AppState, Role};

pub const LOGIN_PATH: &str = "/auth/login";
pub const THERAPIST_VERIFICATION_PATH: &str = "/therapist/verification";

const PUBLIC_PREFIXES: &[&str] = &["/auth", "/blog", "/resources", "/api"];

const PROTECTED_PREFIXES: &[&str] = &["/dashboard", "/parent", "/therapist", "/manager", "/admin"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect(String),
}

/// Prefix match on whole path segments: `/admin` covers `/admin/users` but not `/administer`.
fn has_prefix(path: &str, prefix: &str) -> bool {
    path == prefix || path.strip_prefix(prefix).is_some_and(|rest| rest.starts_with('/'))
}

pub fn allowed_prefixes(role: Role, verified: bool) -> &'static [&'static str] {
    match role {
        Role::Patient => &["/dashboard"],
        Role::ParentGuardian => &["/parent"],
        Role::Therapist if verified => &["/therapist"],
        Role::Therapist => &[THERAPIST_VERIFICATION_PATH],
        Role::Manager => &["/manager"],
        Role::Admin => &["/admin", "/manager"],
    }
}

pub fn home_path(role: Role, verified: bool) -> &'static str {
    match role {
        Role::Patient => "/dashboard",
        Role::ParentGuardian => "/parent/dashboard",
        Role::Therapist if verified => "/therapist/dashboard",
        Role::Therapist => THERAPIST_VERIFICATION_PATH,
        Role::Manager => "/manager/dashboard",
        Role::Admin => "/admin/dashboard",
    }
}

pub fn is_protected(path: &str) -> bool {
    if path == "/" || PUBLIC_PREFIXES.iter().any(|p| has_prefix(path, p)) {
        return false;
    }
    PROTECTED_PREFIXES.iter().any(|p| has_prefix(path, p))
}

/// `caller` is `(role, verified)` of the authenticated user, if any.
pub fn decide(path: &str, caller: Option<(Role, bool)>) -> GateDecision {
    if !is_protected(path) {
        return GateDecision::Allow;
    }
    let Some((role, verified)) = caller else {
        return GateDecision::Redirect(LOGIN_PATH.to_string());
    };
    if allowed_prefixes(role, verified)
        .iter()
        .any(|p| has_prefix(path, p))
    {
        GateDecision::Allow
    } else {
        GateDecision::Redirect(home_path(role, verified).to_string())
    }
}

pub async fn role_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if !is_protected(&path) {
        return next.run(req).await;
    }

    let caller = match AuthContext::resolve(req.headers(), &state).await {
        Ok(ctx) => ctx.map(|c| (c.role, c.verified)),
        Err(e) => return e.into_response(),
    };

    match decide(&path, caller) {
        GateDecision::Allow => next.run(req).await,
        GateDecision::Redirect(to) => {
            tracing::debug!(%path, %to, "role gate redirect");
            Redirect::to(&to).into_response()
        }
    }
}
