/// Email template rendering
///
/// Templates use `{{ name }}` placeholders; whitespace inside the braces is
/// ignored. Values are HTML-escaped in bodies and inserted raw in subjects.
/// Unknown placeholders render as empty strings. An unterminated `{{` is kept
/// literally.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::email_template::EmailTemplateType;

/// Variables available to a template
pub type TemplateVars = HashMap<String, String>;

/// Subject and HTML body pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    pub html: String,
}

impl Template {
    /// Renders both parts
    pub fn render(&self, vars: &TemplateVars) -> Template {
        Template {
            subject: render(&self.subject, vars, false),
            html: render(&self.html, vars, true),
        }
    }
}

/// Substitutes `{{ name }}` placeholders
pub fn render(template: &str, vars: &TemplateVars, escape: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let name = after_open[..end].trim();
        if let Some(value) = vars.get(name) {
            if escape {
                out.push_str(&escape_html(value));
            } else {
                out.push_str(value);
            }
        }

        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Escapes the five HTML-significant characters
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Built-in template used when a workspace has no override
pub fn default_template(template_type: EmailTemplateType) -> Template {
    let (subject, body) = match template_type {
        EmailTemplateType::Invite => (
            "You're invited to join {{ workspace_name }}",
            "<p>Hi {{ recipient_name }},</p>\
             <p>You've been invited to join <strong>{{ workspace_name }}</strong> on Changemaker.</p>\
             <p>Use invite code <strong>{{ invite_code }}</strong> to get started.</p>",
        ),
        EmailTemplateType::EnrollmentUpdate => (
            "Your enrollment in {{ challenge_title }}",
            "<p>Hi {{ recipient_name }},</p>\
             <p>Your enrollment in <strong>{{ challenge_title }}</strong> is now {{ enrollment_status }}.</p>",
        ),
        EmailTemplateType::SubmissionReviewed => (
            "Your submission to {{ challenge_title }} was reviewed",
            "<p>Hi {{ recipient_name }},</p>\
             <p>Your submission to <strong>{{ challenge_title }}</strong> was {{ review_decision }}.</p>\
             <p>Points awarded: {{ points_awarded }}</p>\
             <p>{{ review_notes }}</p>",
        ),
        EmailTemplateType::Reminder => (
            "Reminder: {{ challenge_title }}",
            "<p>Hi {{ recipient_name }},</p>\
             <p>This is a reminder about <strong>{{ challenge_title }}</strong>, which ends on {{ challenge_ends_at }}.</p>",
        ),
        EmailTemplateType::Generic => (
            "{{ subject }}",
            "<p>Hi {{ recipient_name }},</p><p>{{ message }}</p>",
        ),
    };

    Template {
        subject: subject.to_string(),
        html: wrap_layout(body),
    }
}

fn wrap_layout(body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"></head>\
         <body style=\"font-family: Arial, sans-serif; line-height: 1.6; color: #333;\">\
         <div style=\"max-width: 600px; margin: 0 auto; padding: 20px;\">{}\
         <p style=\"color: #888; font-size: 12px;\">Sent by {{{{ workspace_name }}}} via Changemaker</p>\
         </div></body></html>",
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let out = render("Hello {{name}}!", &vars(&[("name", "Ada")]), true);
        assert_eq!(out, "Hello Ada!");
    }

    #[test]
    fn test_render_tolerates_whitespace() {
        let v = vars(&[("name", "Ada")]);
        assert_eq!(render("{{ name }}", &v, true), "Ada");
        assert_eq!(render("{{   name\t}}", &v, true), "Ada");
    }

    #[test]
    fn test_unknown_placeholders_render_empty() {
        assert_eq!(render("a{{ missing }}b", &TemplateVars::new(), true), "ab");
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let v = vars(&[("name", "Ada")]);
        assert_eq!(render("{{ name }} and {{ oops", &v, true), "Ada and {{ oops");
    }

    #[test]
    fn test_body_values_are_escaped() {
        let v = vars(&[("name", "<script>alert('x')</script> & \"co\"")]);
        assert_eq!(
            render("<p>{{ name }}</p>", &v, true),
            "<p>&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; &quot;co&quot;</p>"
        );
    }

    #[test]
    fn test_subject_values_are_raw() {
        let v = vars(&[("title", "Q&A <live>")]);
        let rendered = Template {
            subject: "{{ title }}".into(),
            html: "<h1>{{ title }}</h1>".into(),
        }
        .render(&v);

        assert_eq!(rendered.subject, "Q&A <live>");
        assert_eq!(rendered.html, "<h1>Q&amp;A &lt;live&gt;</h1>");
    }

    #[test]
    fn test_values_are_not_re_expanded() {
        let v = vars(&[("a", "{{ b }}"), ("b", "nope")]);
        assert_eq!(render("{{ a }}", &v, false), "{{ b }}");
    }

    #[test]
    fn test_default_templates_render_workspace_name() {
        let v = vars(&[
            ("workspace_name", "Green Team"),
            ("recipient_name", "Ada"),
            ("invite_code", "ABCD234567"),
        ]);

        for template_type in EmailTemplateType::ALL {
            let template = default_template(template_type);
            assert!(!template.subject.is_empty());
            assert!(template.render(&v).html.contains("Green Team"));
        }

        let invite = default_template(EmailTemplateType::Invite).render(&v);
        assert_eq!(invite.subject, "You're invited to join Green Team");
        assert!(invite.html.contains("ABCD234567"));
    }
}
