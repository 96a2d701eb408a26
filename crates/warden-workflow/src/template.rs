use std::collections::HashMap;

use serde_json::Value;

/// Renders `{variable}` placeholders against the running workflow context.
/// If any referenced key is absent the template is returned unchanged,
/// mirroring `str.format`'s `KeyError` being swallowed by the reference
/// engine rather than aborting the step.
pub fn render(template: &str, context: &HashMap<String, Value>) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(close) = chars[i + 1..].iter().position(|&c| c == '}') {
                let key: String = chars[i + 1..i + 1 + close].iter().collect();
                if !key.is_empty() && key.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    match context.get(&key) {
                        Some(value) => {
                            out.push_str(&display(value));
                            i += close + 2;
                            continue;
                        }
                        None => return template.to_string(),
                    }
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let mut ctx = HashMap::new();
        ctx.insert("topic".to_string(), Value::String("Q3 onboarding".to_string()));
        assert_eq!(render("summarize: {topic}", &ctx), "summarize: Q3 onboarding");
    }

    #[test]
    fn missing_variable_returns_template_unchanged() {
        let ctx = HashMap::new();
        assert_eq!(render("summarize: {topic}", &ctx), "summarize: {topic}");
    }

    #[test]
    fn non_string_values_render_via_json() {
        let mut ctx = HashMap::new();
        ctx.insert("score".to_string(), Value::from(0.91));
        assert_eq!(render("score={score}", &ctx), "score=0.91");
    }
}
