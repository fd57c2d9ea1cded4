/// AI email composer support
///
/// - [`provider`]: streaming chat completions from an OpenAI-compatible API
/// - [`rate_limit`]: per-user sliding-window limiter
/// - [`cost`]: per-workspace daily spend tracking

pub mod cost;
pub mod provider;
pub mod rate_limit;
