//! Filename template rendering.
//!
//! Templates use an explicit allow-list of `{placeholder}` tokens resolved
//! by a small interpreter; free-form interpolation is deliberately not
//! supported so rule input cannot inject storage path segments.

use crate::models::StatementFileType;
use chrono::NaiveDate;
use service_core::error::AppError;

pub const DEFAULT_TEMPLATE: &str = "{institution}-{accountLast4}-{periodEnd}.{fileType}";

pub struct TemplateContext<'a> {
    pub institution: &'a str,
    pub account_last4: &'a str,
    pub period_end: NaiveDate,
    pub file_type: StatementFileType,
}

/// Render a filename template. Unknown or unclosed placeholders fail with
/// `TemplateError`; substituted values are sanitized so the result is a
/// single path segment.
pub fn render_filename(template: &str, ctx: &TemplateContext<'_>) -> Result<String, AppError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            AppError::TemplateError(format!("unclosed placeholder in template '{}'", template))
        })?;
        let name = &after[..close];
        let value = match name {
            "institution" => sanitize(ctx.institution),
            "accountLast4" => sanitize(ctx.account_last4),
            "periodEnd" => ctx.period_end.to_string(),
            "fileType" => ctx.file_type.extension().to_string(),
            other => {
                return Err(AppError::TemplateError(format!(
                    "unknown placeholder '{{{}}}'",
                    other
                )))
            }
        };
        out.push_str(&value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);

    if out.trim().is_empty() {
        return Err(AppError::TemplateError("template rendered empty".to_string()));
    }
    Ok(out)
}

/// Check a template at rule-creation time by rendering it against fixture
/// values, so bad templates are rejected before any delivery runs.
pub fn validate_template(template: &str) -> Result<(), AppError> {
    let ctx = TemplateContext {
        institution: "institution",
        account_last4: "0000",
        period_end: NaiveDate::from_ymd_opt(2000, 1, 31).expect("valid date"),
        file_type: StatementFileType::Pdf,
    };
    render_filename(template, &ctx).map(|_| ())
}

/// Keep substituted values to a single safe path segment.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext<'static> {
        TemplateContext {
            institution: "First Platypus Bank",
            account_last4: "4321",
            period_end: "2024-05-31".parse().unwrap(),
            file_type: StatementFileType::Pdf,
        }
    }

    #[test]
    fn renders_default_template() {
        let rendered = render_filename(DEFAULT_TEMPLATE, &ctx()).unwrap();
        assert_eq!(rendered, "First Platypus Bank-4321-2024-05-31.pdf");
    }

    #[test]
    fn rejects_unknown_placeholder() {
        let err = render_filename("{institution}-{badToken}", &ctx());
        assert!(matches!(err, Err(AppError::TemplateError(_))));
    }

    #[test]
    fn rejects_unclosed_placeholder() {
        let err = render_filename("{institution", &ctx());
        assert!(matches!(err, Err(AppError::TemplateError(_))));
    }

    #[test]
    fn sanitizes_path_separators_in_values() {
        let ctx = TemplateContext {
            institution: "../etc/passwd",
            account_last4: "9876",
            period_end: "2024-01-31".parse().unwrap(),
            file_type: StatementFileType::Csv,
        };
        let rendered = render_filename(DEFAULT_TEMPLATE, &ctx).unwrap();
        assert!(!rendered.contains('/'));
        assert!(rendered.ends_with(".csv"));
    }

    #[test]
    fn validate_rejects_bad_templates_up_front() {
        assert!(validate_template(DEFAULT_TEMPLATE).is_ok());
        assert!(validate_template("{nope}").is_err());
        assert!(validate_template("{institution").is_err());
    }

    #[test]
    fn literal_text_passes_through() {
        let rendered = render_filename("statement_{periodEnd}.{fileType}", &ctx()).unwrap();
        assert_eq!(rendered, "statement_2024-05-31.pdf");
    }
}
