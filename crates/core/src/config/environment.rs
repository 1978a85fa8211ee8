//! Snapshot of environment variables
//!
//! The session never reads or writes the process environment after start-up.
//! Everything it needs is captured once into an [`Environment`] and every
//! subprocess gets its variables from there.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        std::env::vars().collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Like [`Environment::get`] but treats empty values as unset
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Expand `$NAME` and `${NAME}` references. Unknown variables are left
    /// untouched, matching shell-less expansion in the runner scripts.
    pub fn expand(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];

            let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
                match braced.find('}') {
                    Some(end) => (&braced[..end], end + 2),
                    None => ("", 0),
                }
            } else {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            };

            match self.get(name).filter(|_| !name.is_empty()) {
                Some(value) => out.push_str(value),
                None => {
                    out.push('$');
                    out.push_str(&after[..consumed]);
                }
            }
            rest = &after[consumed..];
        }

        out.push_str(rest);
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_plain_and_braced() {
        let env: Environment = [("CHPL_HOME", "/opt/chapel"), ("SUB", "linux64")]
            .into_iter()
            .collect();

        assert_eq!(
            env.expand("$CHPL_HOME/bin/${SUB}/chpl"),
            "/opt/chapel/bin/linux64/chpl"
        );
    }

    #[test]
    fn test_expand_leaves_unknown_references() {
        let env = Environment::default();
        assert_eq!(env.expand("mpirun -n $NP ${X} $"), "mpirun -n $NP ${X} $");
        assert_eq!(env.expand("${unterminated"), "${unterminated");
    }

    #[test]
    fn test_get_non_empty() {
        let env: Environment = [("A", ""), ("B", "x")].into_iter().collect();
        assert_eq!(env.get("A"), Some(""));
        assert_eq!(env.get_non_empty("A"), None);
        assert_eq!(env.get_non_empty("B"), Some("x"));
    }
}
