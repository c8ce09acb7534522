// crates/core/src/env.rs
//! Environment handed to the `claude` subprocess.
//!
//! The child must not inherit our own `CLAUDE*` variables (they make the CLI
//! think it is nested inside another session) nor either raw credential. A
//! single resolved key is re-injected as `ANTHROPIC_API_KEY`.

pub const MAX_API_KEY: &str = "MAX_API_KEY";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";

const STRIPPED_PREFIX: &str = "CLAUDE";

/// A snapshot of environment variables.
pub trait EnvSource {
    fn vars(&self) -> Vec<(String, String)>;

    fn var(&self, key: &str) -> Option<String> {
        self.vars().into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// The live process environment. Non-UTF-8 entries are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed in-memory environment.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv(Vec<(String, String)>);

impl StaticEnv {
    pub fn new<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl EnvSource for StaticEnv {
    fn vars(&self) -> Vec<(String, String)> {
        self.0.clone()
    }
}

/// `MAX_API_KEY` when set and non-empty, otherwise `ANTHROPIC_API_KEY`.
pub fn resolved_api_key(source: &dyn EnvSource) -> Option<String> {
    source
        .var(MAX_API_KEY)
        .filter(|k| !k.is_empty())
        .or_else(|| source.var(ANTHROPIC_API_KEY))
        .filter(|k| !k.is_empty())
}

/// Environment for the child process, with the resolved key re-injected.
pub fn filtered_env(source: &dyn EnvSource) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = source
        .vars()
        .into_iter()
        .filter(|(k, _)| {
            !k.starts_with(STRIPPED_PREFIX) && k != MAX_API_KEY && k != ANTHROPIC_API_KEY
        })
        .collect();
    if let Some(key) = resolved_api_key(source) {
        env.push((ANTHROPIC_API_KEY.to_string(), key));
    }
    env
}
