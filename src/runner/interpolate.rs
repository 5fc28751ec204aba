//! Variable interpolation for strings
//!
//! Replaces `${NAME}` with the value of `NAME` from a variable map. Unknown
//! names are left untouched so the shell can still expand them from the
//! command environment.

use crate::error::{InterpolationError, InterpolationResult};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Resolved variables, keyed by name
pub type Vars = BTreeMap<String, String>;

/// How many expansion passes a value may need before it is considered recursive
const MAX_DEPTH: usize = 16;

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("static pattern is valid"))
}

/// Interpolate variables in a string
///
/// Values may themselves reference other variables; they are expanded until
/// nothing changes.
pub fn interpolate(s: &str, vars: &Vars) -> InterpolationResult<String> {
    let re = var_pattern();
    let mut result = s.to_string();

    for _ in 0..MAX_DEPTH {
        let mut changed = false;
        let next = re
            .replace_all(&result, |caps: &Captures| match vars.get(&caps[1]) {
                Some(value) => {
                    changed = true;
                    value.clone()
                }
                None => caps[0].to_string(),
            })
            .into_owned();

        if !changed {
            return Ok(next);
        }
        result = next;
    }

    Err(InterpolationError::RecursiveInterpolation)
}

/// Interpolate a list of strings
pub fn interpolate_list(list: &[String], vars: &Vars) -> InterpolationResult<Vec<String>> {
    list.iter().map(|s| interpolate(s, vars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_simple_interpolation() {
        let result = interpolate("Hello, ${name}!", &vars(&[("name", "world")])).unwrap();
        assert_eq!(result, "Hello, world!");
    }

    #[test]
    fn test_multiple_variables() {
        let vars = vars(&[("first", "John"), ("last", "Doe")]);
        assert_eq!(interpolate("${first} ${last}", &vars).unwrap(), "John Doe");
    }

    #[test]
    fn test_undefined_variable_is_left_for_the_shell() {
        let result = interpolate("echo ${HOME_DIR}", &Vars::new()).unwrap();
        assert_eq!(result, "echo ${HOME_DIR}");
    }

    #[test]
    fn test_nested_interpolation() {
        let vars = vars(&[("inner", "value"), ("outer", "${inner}")]);
        assert_eq!(interpolate("Result: ${outer}", &vars).unwrap(), "Result: value");
    }

    #[test]
    fn test_recursive_interpolation() {
        let vars = vars(&[("a", "${b}"), ("b", "${a}")]);
        assert!(matches!(
            interpolate("${a}", &vars),
            Err(InterpolationError::RecursiveInterpolation)
        ));
    }

    #[test]
    fn test_interpolate_list() {
        let vars = vars(&[("env", "production")]);
        let list = vec!["file-${env}.txt".to_string(), "static.txt".to_string()];
        let result = interpolate_list(&list, &vars).unwrap();
        assert_eq!(result, vec!["file-production.txt", "static.txt"]);
    }

    #[test]
    fn test_empty_variable_name() {
        let result = interpolate("Value: ${}", &Vars::new()).unwrap();
        assert_eq!(result, "Value: ${}");
    }
}
