//! The scripting collaborator interface — an embedded evaluator for the
//! `runScript` step and `${…}` variable expansion. This module defines the
//! trait boundary only; no evaluator ships with this crate, which treats it
//! as an external collaborator.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FlowError;

#[async_trait]
pub trait ScriptEngine: Send + Sync {
    async fn eval(&self, script: &str) -> Result<Value, FlowError>;
    async fn eval_string(&self, script: &str) -> Result<String, FlowError>;
    async fn run_script(&self, script: &str) -> Result<(), FlowError>;
    async fn set_variable(&self, name: &str, value: Value);
}

/// Expand `${…}` placeholders in `template` by evaluating each balanced
/// expression through `engine`. An expression that fails to evaluate is
/// left in the output literally, `${…}` and all.
pub async fn expand_variables(engine: &dyn ScriptEngine, template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match find_balanced_close(after) {
            Some(end) => {
                let expr = &after[..end];
                match engine.eval_string(expr).await {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(expr);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unbalanced: no closing brace anywhere — emit the rest
                // literally and stop.
                out.push_str("${");
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Find the index of the `}` that balances the first `{` depth in `s`,
/// accounting for nested `${…}` inside the expression.
fn find_balanced_close(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoEngine {
        fail_on: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScriptEngine for EchoEngine {
        async fn eval(&self, script: &str) -> Result<Value, FlowError> {
            Ok(Value::String(script.to_string()))
        }

        async fn eval_string(&self, script: &str) -> Result<String, FlowError> {
            if self.fail_on.lock().unwrap().iter().any(|s| s == script) {
                return Err(FlowError::new(
                    crate::error::Category::Config,
                    crate::error::codes::INVALID_CONFIG,
                    "forced failure",
                ));
            }
            Ok(format!("<{}>", script))
        }

        async fn run_script(&self, _script: &str) -> Result<(), FlowError> {
            Ok(())
        }

        async fn set_variable(&self, _name: &str, _value: Value) {}
    }

    #[tokio::test]
    async fn expands_a_single_balanced_expression() {
        let engine = EchoEngine { fail_on: Mutex::new(vec![]) };
        let out = expand_variables(&engine, "hello ${name}!").await;
        assert_eq!(out, "hello <name>!");
    }

    #[tokio::test]
    async fn expands_multiple_expressions_in_order() {
        let engine = EchoEngine { fail_on: Mutex::new(vec![]) };
        let out = expand_variables(&engine, "${a}-${b}").await;
        assert_eq!(out, "<a>-<b>");
    }

    #[tokio::test]
    async fn leaves_literal_on_eval_failure() {
        let engine = EchoEngine { fail_on: Mutex::new(vec!["bad".to_string()]) };
        let out = expand_variables(&engine, "x=${bad} y=${ok}").await;
        assert_eq!(out, "x=${bad} y=<ok>");
    }

    #[tokio::test]
    async fn handles_nested_braces_in_expression() {
        let engine = EchoEngine { fail_on: Mutex::new(vec![]) };
        let out = expand_variables(&engine, "${ {a:1} }").await;
        assert_eq!(out, "< {a:1} >");
    }

    #[tokio::test]
    async fn passes_through_text_with_no_placeholders() {
        let engine = EchoEngine { fail_on: Mutex::new(vec![]) };
        let out = expand_variables(&engine, "plain text").await;
        assert_eq!(out, "plain text");
    }
}
