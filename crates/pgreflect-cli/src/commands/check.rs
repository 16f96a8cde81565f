//! `pgreflect check` - validate the configuration and summarise it.
//!
//! Loading already enforces the hard invariants (non-empty names, positive
//! rate limits). This command adds warnings for settings that load fine but
//! weaken scoping, then prints the effective rule table and tenants.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;
use pgreflect_core::{ReflectionConfig, ScopeSource, TlsMode};

/// Severity level for check findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
        }
    }
}

/// A single check finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFinding {
    pub severity: Severity,
    pub message: String,
}

impl CheckFinding {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }
}

pub fn run(config_path: &Path) -> Result<()> {
    let config = super::load_config(config_path)?;

    let findings = check(&config);
    for finding in &findings {
        println!("[{}] {}", finding.severity, finding.message);
    }
    print!("{}", summary(&config));

    let warnings = findings
        .iter()
        .filter(|f| f.severity == Severity::Warning)
        .count();
    println!(
        "{}: configuration is valid ({warnings} warning(s))",
        config_path.display()
    );
    Ok(())
}

/// Findings for a configuration that has already passed validation.
pub fn check(config: &ReflectionConfig) -> Vec<CheckFinding> {
    let mut findings = Vec::new();

    let mut seen = HashSet::new();
    for rule in &config.interception.rules {
        let key = (rule.table_name.to_lowercase(), rule.column_name.to_lowercase());
        if !seen.insert(key) {
            findings.push(CheckFinding::warning(format!(
                "duplicate interception rule on {}.{}",
                rule.table_name, rule.column_name
            )));
        }
    }

    if config.interception.rules.is_empty() {
        findings.push(CheckFinding::warning(
            "no interception rules: catalog queries are forwarded unscoped",
        ));
    }

    let reads_schemas = config
        .interception
        .rules
        .iter()
        .any(|r| r.scope_source == ScopeSource::VisibleSchemas);
    for (tenant_id, entry) in &config.tenants {
        if reads_schemas && entry.schemas.is_empty() {
            findings.push(CheckFinding::warning(format!(
                "tenant {tenant_id} has no schemas; rules on visible_schemas are skipped for it"
            )));
        }

        let backend = config.backend_for(entry);
        if backend.tls.mode != TlsMode::Disable && !backend.tls.verify_certificate {
            findings.push(CheckFinding::warning(format!(
                "tenant {tenant_id}: backend {} certificate is not verified",
                backend.address()
            )));
        }
    }

    if config.tenants.is_empty() {
        findings.push(CheckFinding::info("no tenants configured"));
    }

    let requested_last = u32::from(config.listen.base_port) + u32::from(config.listen.port_range.max(1)) - 1;
    if requested_last > u32::from(u16::MAX) {
        findings.push(CheckFinding::warning(format!(
            "port range truncated at {}",
            u16::MAX
        )));
    }

    findings
}

fn summary(config: &ReflectionConfig) -> String {
    let mut out = String::new();
    let ports = config.listen.ports();
    let _ = writeln!(
        out,
        "listen:     {} ports {}-{}",
        config.listen.address,
        ports.start(),
        ports.end()
    );
    let _ = writeln!(out, "backend:    {} ({})", config.backend.address(), config.backend.database);
    let _ = writeln!(
        out,
        "rate limit: {} queries / {}ms",
        config.rate_limit.max_queries, config.rate_limit.window_ms
    );

    let _ = writeln!(out, "rules:");
    for rule in &config.interception.rules {
        let _ = writeln!(
            out,
            "  {}.{} {:?} {}",
            rule.table_name, rule.column_name, rule.match_kind, rule.scope_source
        );
    }

    let _ = writeln!(out, "tenants:");
    for (tenant_id, entry) in &config.tenants {
        let backend = config.backend_for(entry);
        let _ = writeln!(
            out,
            "  {tenant_id}: user {} on {}/{} schemas [{}]",
            entry.username,
            backend.address(),
            backend.database,
            entry.schemas.join(", ")
        );
    }
    out
}
