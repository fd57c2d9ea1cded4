/// Email templating and delivery
///
/// - [`template`]: `{{ placeholder }}` rendering and the built-in templates
/// - [`mailer`]: the `Mailer` trait with Resend and logging implementations

pub mod mailer;
pub mod template;
