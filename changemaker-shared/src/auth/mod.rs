/// Authentication and authorization
///
/// Sessions are issued by Supabase; this module only verifies them and maps
/// the Supabase account to a local user and its workspace roles.
///
/// # Modules
///
/// - [`session`]: Supabase access token verification and extraction
/// - [`middleware`]: Axum middleware that resolves the caller
/// - [`authorization`]: Workspace membership and role checks
///
/// # Example
///
/// ```no_run
/// use changemaker_shared::auth::session::{extract_token, verify_access_token};
/// use axum::http::HeaderMap;
///
/// # fn example(headers: &HeaderMap) -> Result<(), Box<dyn std::error::Error>> {
/// if let Some(token) = extract_token(headers) {
///     let claims = verify_access_token(&token, "project-jwt-secret", "authenticated")?;
///     println!("Supabase user {}", claims.sub);
/// }
/// # Ok(())
/// # }
/// ```

pub mod authorization;
pub mod middleware;
pub mod session;
