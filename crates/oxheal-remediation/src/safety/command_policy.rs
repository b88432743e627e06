use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPolicyConfig {
    /// When non-empty, every command must match one of these.
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default = "default_deny")]
    pub deny: Vec<String>,
}

fn default_deny() -> Vec<String> {
    [
        // Recursive delete of / itself; subpaths are fine.
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*f?\s+/(\s|$|\*)",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\s+if=",
        r"\b(shutdown|reboot|halt|poweroff)\b",
        r">\s*/dev/sd[a-z]",
        // Fork bomb.
        r":\(\)\s*\{",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Default for CommandPolicyConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: default_deny(),
        }
    }
}

/// Allow/deny patterns every runbook command is checked against.
/// A violation cannot be overridden by approval.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl CommandPolicy {
    pub fn new(config: &CommandPolicyConfig) -> Result<Self, regex::Error> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            allow: compile(&config.allow)?,
            deny: compile(&config.deny)?,
        })
    }

    pub fn check(&self, command: &str) -> Result<(), String> {
        // Deny beats allow.
        if let Some(rule) = self.deny.iter().find(|re| re.is_match(command)) {
            return Err(format!(
                "command `{command}` matches deny pattern `{}`",
                rule.as_str()
            ));
        }
        if !self.allow.is_empty() && !self.allow.iter().any(|re| re.is_match(command)) {
            return Err(format!("command `{command}` is not in the allow list"));
        }
        Ok(())
    }

    pub fn check_all(&self, commands: &[String]) -> Result<(), String> {
        commands.iter().try_for_each(|c| self.check(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runbook::default_runbooks;

    #[test]
    fn default_deny_list() {
        let policy = CommandPolicy::new(&CommandPolicyConfig::default()).unwrap();
        assert!(policy.check("rm -rf /").is_err());
        assert!(policy.check("rm -rf /*").is_err());
        assert!(policy.check("mkfs.ext4 /dev/sdb1").is_err());
        assert!(policy.check("sudo reboot").is_err());
        assert!(policy.check("rm -rf /var/tmp/cache").is_ok());
        assert!(policy.check("systemctl restart 'app'").is_ok());
    }

    #[test]
    fn default_runbooks_pass_default_policy() {
        let policy = CommandPolicy::new(&CommandPolicyConfig::default()).unwrap();
        let ctx = crate::runbook::tests::metric_context("cpu_percent", "web-01");
        for rb in default_runbooks() {
            assert!(policy.check_all(&rb.gated_commands(&ctx)).is_ok(), "{}", rb.name);
        }
    }

    #[test]
    fn allow_list_restricts() {
        let policy = CommandPolicy::new(&CommandPolicyConfig {
            allow: vec![r"^systemctl ".into()],
            deny: vec![],
        })
        .unwrap();
        assert!(policy.check("systemctl restart app").is_ok());
        let err = policy.check("sync").unwrap_err();
        assert!(err.contains("allow list"));
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let config = CommandPolicyConfig {
            allow: vec![],
            deny: vec!["(".into()],
        };
        assert!(CommandPolicy::new(&config).is_err());
    }
}
