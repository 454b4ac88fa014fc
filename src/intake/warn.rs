//! Single-line warn records for recoverable degradations.

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() || ch == '=' {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub action: &'a str,
    pub tenant: &'a str,
    pub subject: &'a str,
    pub retry: &'a str,
    pub reason: &'a str,
    pub err: &'a str,
}

impl WarnEvent<'_> {
    pub fn render(&self) -> String {
        format!(
            "INTAKE_WARN code={} stage={} action={} tenant={} subject={} retry={} reason={} err={}",
            sanitize_value(self.code),
            sanitize_value(self.stage),
            sanitize_value(self.action),
            sanitize_value(self.tenant),
            sanitize_value(self.subject),
            sanitize_value(self.retry),
            sanitize_value(self.reason),
            sanitize_value(self.err),
        )
    }
}

pub fn emit(event: &WarnEvent<'_>) {
    tracing::warn!(code = event.code, stage = event.stage, "{}", event.render());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_value_rewrites_whitespace_and_equals() {
        assert_eq!(sanitize_value("a b\tc"), "a_b_c");
        assert_eq!(sanitize_value("k=v"), "k_v");
    }

    #[test]
    fn empty_fields_render_as_na() {
        let line = WarnEvent {
            code: "CLASSIFIER_UNAVAILABLE",
            stage: "ingest",
            reason: "timed out after 20s",
            ..WarnEvent::default()
        }
        .render();
        assert!(line.starts_with("INTAKE_WARN code=CLASSIFIER_UNAVAILABLE stage=ingest action=na"));
        assert!(line.contains("reason=timed_out_after_20s"));
    }
}
