use std::collections::HashMap;

/// Environment variables that are always forwarded when spawning an MCP
/// server child process. Upstreams inherit only this curated subset plus
/// whatever the server config adds explicitly.
#[rustfmt::skip]
#[cfg(unix)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "HOME",
    "LOGNAME",
    "PATH",
    "SHELL",
    "USER",
    "__CF_USER_TEXT_ENCODING",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "TZ",
];

#[cfg(windows)]
const DEFAULT_ENV_VARS: &[&str] = &[
    "PATH",
    "PATHEXT",
    "USERNAME",
    "USERDOMAIN",
    "USERPROFILE",
    "TEMP",
    "TMP",
];

/// `extra_env` comes from the `env` table of an upstream server config.
pub fn create_env_for_mcp_server(
    extra_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    DEFAULT_ENV_VARS
        .iter()
        .filter_map(|var| match std::env::var(var) {
            Ok(value) => Some((var.to_string(), value)),
            Err(_) => None,
        })
        .chain(extra_env.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect::<HashMap<_, _>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_env_overrides_inherited_values() {
        let var = "PATH";
        let override_value = "/opt/override/bin".to_string();
        let extra = HashMap::from([(var.to_string(), override_value.clone())]);
        let env = create_env_for_mcp_server(&extra);
        assert_eq!(env.get(var), Some(&override_value));
    }
}
