use thiserror::Error;

/// An environment variable required by the application is not set.
#[derive(Debug, Error)]
#[error("Missing environment variable: {0}")]
pub struct MissingEnvVarError(pub String);

/// Reads an environment variable, returning a structured error if it's missing.
///
/// This is a thin wrapper around `std::env::var` that provides a more
/// ergonomic and specific error type for missing variables.
pub fn get_env_var(name: &str) -> Result<String, MissingEnvVarError> {
    std::env::var(name).map_err(|_| MissingEnvVarError(name.to_string()))
}

/// Expands `${VAR}` and `${VAR:-default}` placeholders in declarative
/// configuration text before it is deserialized.
///
/// A `${VAR}` placeholder with no default and no matching environment
/// variable is an error rather than a passthrough: a half-substituted
/// config file fails later in much more confusing ways.
pub fn substitute_env_vars(content: &str) -> Result<String, MissingEnvVarError> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated placeholder, keep the remainder verbatim.
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let expr = &after[..end];
        match expr.split_once(":-") {
            Some((name, default)) => match std::env::var(name) {
                Ok(value) => out.push_str(&value),
                Err(_) => out.push_str(default),
            },
            None => out.push_str(&get_env_var(expr)?),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_set_variable() {
        unsafe { std::env::set_var("SHARED_UTILS_TEST_HOST", "db.internal") };
        let out = substitute_env_vars("host = \"${SHARED_UTILS_TEST_HOST}\"").unwrap();
        assert_eq!(out, "host = \"db.internal\"");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        let out = substitute_env_vars("port = ${SHARED_UTILS_TEST_UNSET:-5432}").unwrap();
        assert_eq!(out, "port = 5432");
    }

    #[test]
    fn missing_variable_without_default_is_an_error() {
        let err = substitute_env_vars("key = \"${SHARED_UTILS_TEST_ABSENT}\"").unwrap_err();
        assert!(err.to_string().contains("SHARED_UTILS_TEST_ABSENT"));
    }

    #[test]
    fn unterminated_placeholder_passes_through() {
        let out = substitute_env_vars("tail ${UNTERMINATED").unwrap();
        assert_eq!(out, "tail ${UNTERMINATED");
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let out = substitute_env_vars("plain = true").unwrap();
        assert_eq!(out, "plain = true");
    }
}
