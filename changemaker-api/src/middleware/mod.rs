/// Middleware modules for the API server
///
/// - `security`: security response headers
/// - `rate_limit`: per-user limit on AI generations
///
/// Session authentication lives in `changemaker_shared::auth::middleware`.

pub mod rate_limit;
pub mod security;
