//! Bootstraps the first ADMIN account. Self-registration never grants staff roles.
//!
//! Usage: create_admin <email> <name> <password>

use anyhow::{Context, bail};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};

const PATIENT_ROLE: i16 = 0;
const ADMIN_ROLE: i16 = 1;
const THERAPIST_ROLE: i16 = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(email), Some(name), Some(password)) = (args.next(), args.next(), args.next()) else {
        bail!("Usage: create_admin <email> <name> <password>");
    };
    let email = email.trim().to_ascii_lowercase();
    if !email.contains('@') {
        bail!("'{email}' is not an email address");
    }
    if password.trim().len() < 8 {
        bail!("password must be at least 8 characters");
    }

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash failed: {e}"))?
        .to_string();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = sqlx::PgPool::connect(&database_url).await?;

    let existing: Option<i16> = sqlx::query_scalar("SELECT role FROM app_user WHERE email = $1")
        .bind(&email)
        .fetch_optional(&pool)
        .await?;
    if let Some(role) = existing.filter(|r| !can_promote(*r)) {
        bail!("{email} is a {} account with a profile and cannot become an admin", role_name(role));
    }

    // an existing staff or guardian account with this email is promoted and re-keyed
    let user_id: Option<uuid::Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO app_user (email, name, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET role = EXCLUDED.role,
            password_hash = EXCLUDED.password_hash,
            is_active = true
        WHERE app_user.role NOT IN ($5, $6)
        RETURNING user_id
        "#,
    )
    .bind(&email)
    .bind(name.trim())
    .bind(&phc)
    .bind(ADMIN_ROLE)
    .bind(PATIENT_ROLE)
    .bind(THERAPIST_ROLE)
    .fetch_optional(&pool)
    .await?;
    let Some(user_id) = user_id else {
        bail!("{email} cannot be promoted to admin; nothing was written");
    };

    println!("admin {email} ready ({user_id})");
    Ok(())
}

/// Patient and therapist accounts own profile rows an admin never has.
fn can_promote(role: i16) -> bool {
    role != PATIENT_ROLE && role != THERAPIST_ROLE
}

fn role_name(role: i16) -> &'static str {
    match role {
        PATIENT_ROLE => "PATIENT",
        THERAPIST_ROLE => "THERAPIST",
        _ => "staff",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_accounts_are_never_promoted() {
        assert!(!can_promote(PATIENT_ROLE));
        assert!(!can_promote(THERAPIST_ROLE));
        assert!(can_promote(ADMIN_ROLE));
        assert!(can_promote(2)); // manager
        assert!(can_promote(4)); // parent/guardian
    }
}
