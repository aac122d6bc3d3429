use std::process::Command;
use tracing::debug;

use crate::host::{FilterRule, HostError, HostResult, PacketFilter};

/// [`PacketFilter`] backed by the `iptables` binary (IPv4 only).
pub struct Iptables {
    program: String,
}

impl Iptables {
    pub fn new() -> Self {
        Self {
            program: "iptables".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args<'a>(action: &'a str, rule: &'a FilterRule) -> Vec<&'a str> {
        // -w waits for the xtables lock instead of failing when another
        // process holds it.
        let mut args = vec!["-w", "-t", rule.table.as_str(), action, rule.chain.as_str()];
        args.extend(rule.spec.iter().map(String::as_str));
        args
    }

    fn run(&self, action: &str, rule: &FilterRule) -> HostResult<std::process::Output> {
        let args = Self::args(action, rule);
        debug!("Running: {} {}", self.program, args.join(" "));

        Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| HostError::Spawn {
                program: self.program.clone(),
                source: e,
            })
    }

    fn failure(&self, action: &str, rule: &FilterRule, output: &std::process::Output) -> HostError {
        HostError::CommandFailed {
            command: format!("{} {}", self.program, Self::args(action, rule).join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl Default for Iptables {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketFilter for Iptables {
    fn exists(&self, rule: &FilterRule) -> HostResult<bool> {
        let output = self.run("-C", rule)?;

        // -C exits 1 when no matching rule is present; anything else is a
        // real failure (bad table, missing chain, lock timeout).
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.failure("-C", rule, &output)),
        }
    }

    fn append(&self, rule: &FilterRule) -> HostResult<()> {
        let output = self.run("-A", rule)?;
        if !output.status.success() {
            return Err(self.failure("-A", rule, &output));
        }
        Ok(())
    }

    fn delete(&self, rule: &FilterRule) -> HostResult<()> {
        let output = self.run("-D", rule)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("does a matching rule exist")
                || stderr.contains("No chain/target/match")
            {
                return Err(HostError::NotFound(rule.to_string()));
            }
            return Err(self.failure("-D", rule, &output));
        }
        Ok(())
    }
}
