//! Classification rule table
//!
//! Rules are read from a JSON array, in order:
//!
//! ```json
//! [
//!   { "name": "core-switches", "field": "sys_descr", "pattern": "Cisco IOS",
//!     "department": "IT", "unit": "Switches" },
//!   { "name": "lab-subnet", "field": "subnet", "pattern": "10.20.0.0/16",
//!     "department": "Research" }
//! ]
//! ```
//!
//! Text patterns are case-insensitive regular expressions. The first enabled
//! rule that matches wins. A malformed entry is logged and skipped; the rest
//! of the table still applies.

use ipnetwork::Ipv4Network;
use regex::{Regex, RegexBuilder};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::database::{find_department, find_unit};
use crate::error::{Error, Result};
use crate::network::parse_network;
use crate::scanner::SystemInfo;

/// Compiled regexes larger than this are rejected
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// What a rule matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleField {
    SysDescr,
    SysObjectId,
    SysName,
    SysLocation,
    Hostname,
    Subnet,
}

impl std::str::FromStr for RuleField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sys_descr" => Ok(RuleField::SysDescr),
            "sys_object_id" => Ok(RuleField::SysObjectId),
            "sys_name" => Ok(RuleField::SysName),
            "sys_location" => Ok(RuleField::SysLocation),
            "hostname" => Ok(RuleField::Hostname),
            "subnet" => Ok(RuleField::Subnet),
            other => Err(format!("unknown match field '{}'", other)),
        }
    }
}

/// One rule as written in the table file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub field: String,
    pub pattern: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Reads the rule file. No path means an empty table.
pub fn load_rule_specs(path: Option<&Path>) -> Result<Vec<RuleSpec>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::RuleTable(format!("{}: {}", path.display(), e)))?;
    parse_rule_specs(&raw).map_err(|e| match e {
        Error::RuleTable(reason) => Error::RuleTable(format!("{}: {}", path.display(), reason)),
        other => other,
    })
}

pub fn parse_rule_specs(raw: &str) -> Result<Vec<RuleSpec>> {
    serde_json::from_str(raw).map_err(|e| Error::RuleTable(e.to_string()))
}

#[derive(Debug, Clone)]
enum Matcher {
    Text { field: RuleField, regex: Regex },
    Subnet(Ipv4Network),
}

/// A rule with its pattern compiled and its targets resolved to IDs
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    matcher: Matcher,
    pub department_id: Option<i64>,
    pub unit_id: Option<i64>,
}

/// Values a rule can be evaluated against
#[derive(Debug, Clone, Copy)]
pub struct MatchSubject<'a> {
    pub hostname: Option<&'a str>,
    pub address: Option<Ipv4Addr>,
    pub info: &'a SystemInfo,
}

impl CompiledRule {
    pub fn matches(&self, subject: &MatchSubject<'_>) -> bool {
        match &self.matcher {
            Matcher::Subnet(network) => subject.address.is_some_and(|ip| network.contains(ip)),
            Matcher::Text { field, regex } => {
                let value = match field {
                    RuleField::SysDescr => subject.info.sys_descr.as_deref(),
                    RuleField::SysObjectId => subject.info.sys_object_id.as_deref(),
                    RuleField::SysName => subject.info.sys_name.as_deref(),
                    RuleField::SysLocation => subject.info.sys_location.as_deref(),
                    RuleField::Hostname => subject.hostname,
                    RuleField::Subnet => None,
                };
                value.is_some_and(|v| regex.is_match(v))
            }
        }
    }
}

/// Ordered, compiled rule table
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: Vec<CompiledRule>,
    rejected: Vec<Error>,
}

impl RuleTable {
    /// Compiles every spec, resolving target names against the database.
    ///
    /// Rejected rules are kept as [`Error::ClassificationRule`] values and
    /// never evaluated. Disabled rules are dropped silently.
    pub fn compile(conn: &Connection, specs: &[RuleSpec]) -> Result<Self> {
        let mut table = RuleTable::default();

        for spec in specs.iter().filter(|s| s.enabled) {
            match compile_rule(conn, spec)? {
                Ok(rule) => table.rules.push(rule),
                Err(rejection) => {
                    tracing::warn!("{}", rejection);
                    table.rejected.push(rejection);
                }
            }
        }

        tracing::debug!(
            "Rule table ready: {} active, {} rejected",
            table.rules.len(),
            table.rejected.len()
        );
        Ok(table)
    }

    /// First rule matching `subject`, in table order
    pub fn first_match(&self, subject: &MatchSubject<'_>) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(subject))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rejected(&self) -> &[Error] {
        &self.rejected
    }
}

fn reject(spec: &RuleSpec, reason: impl Into<String>) -> Error {
    Error::ClassificationRule {
        rule: spec.name.clone(),
        reason: reason.into(),
    }
}

/// Outer error: database failure. Inner error: the rule itself is bad.
fn compile_rule(conn: &Connection, spec: &RuleSpec) -> Result<std::result::Result<CompiledRule, Error>> {
    if spec.department.is_none() && spec.unit.is_none() {
        return Ok(Err(reject(spec, "rule has no department or unit target")));
    }

    let field: RuleField = match spec.field.parse() {
        Ok(field) => field,
        Err(reason) => return Ok(Err(reject(spec, reason))),
    };

    let matcher = if field == RuleField::Subnet {
        match parse_network(&spec.pattern) {
            Ok(network) => Matcher::Subnet(network),
            Err(e) => return Ok(Err(reject(spec, e.to_string()))),
        }
    } else {
        let built = RegexBuilder::new(&spec.pattern)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build();
        match built {
            Ok(regex) => Matcher::Text { field, regex },
            Err(e) => return Ok(Err(reject(spec, format!("invalid pattern: {}", e)))),
        }
    };

    let department_id = match &spec.department {
        None => None,
        Some(name) => match find_department(conn, name)? {
            Some(department) => Some(department.id),
            None => return Ok(Err(reject(spec, format!("unknown department '{}'", name)))),
        },
    };

    let unit_id = match &spec.unit {
        None => None,
        Some(name) => match find_unit(conn, name)? {
            Some(unit) => Some(unit.id),
            None => return Ok(Err(reject(spec, format!("unknown equipment unit '{}'", name)))),
        },
    };

    Ok(Ok(CompiledRule {
        name: spec.name.clone(),
        matcher,
        department_id,
        unit_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, create_department, create_unit};

    fn spec(name: &str, field: &str, pattern: &str, department: Option<&str>) -> RuleSpec {
        RuleSpec {
            name: name.to_string(),
            field: field.to_string(),
            pattern: pattern.to_string(),
            department: department.map(str::to_string),
            unit: None,
            enabled: true,
        }
    }

    fn cisco() -> SystemInfo {
        SystemInfo {
            sys_descr: Some("Cisco IOS Software, C2960".to_string()),
            ..SystemInfo::default()
        }
    }

    #[test]
    fn parses_file_format_with_defaults() {
        let specs = parse_rule_specs(
            r#"[{"name": "lab", "field": "subnet", "pattern": "10.20.0.0/16", "unit": "Lab"}]"#,
        )
        .unwrap();
        assert_eq!(specs.len(), 1);
        assert!(specs[0].enabled);
        assert_eq!(specs[0].department, None);

        assert!(matches!(parse_rule_specs("{not json"), Err(Error::RuleTable(_))));
    }

    #[test]
    fn missing_file_is_a_table_error() {
        let result = load_rule_specs(Some(Path::new("/nonexistent/assetscan/rules.json")));
        assert!(matches!(result, Err(Error::RuleTable(_))));
        assert!(load_rule_specs(None).unwrap().is_empty());
    }

    #[test]
    fn bad_rules_are_skipped_not_fatal() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        create_department(&conn, "IT", None).unwrap();

        let specs = vec![
            spec("broken-regex", "sys_descr", "Cisco(", Some("IT")),
            spec("ghost-target", "sys_descr", "Cisco", Some("Nowhere")),
            spec("no-target", "sys_descr", "Cisco", None),
            spec("bad-field", "sys_uptime", "1", Some("IT")),
            spec("bad-cidr", "subnet", "10.0.0.0/40", Some("IT")),
            spec("good", "sys_descr", "cisco ios", Some("IT")),
        ];
        let table = RuleTable::compile(&conn, &specs).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.rejected().len(), 5);
        assert!(table
            .rejected()
            .iter()
            .all(|e| matches!(e, Error::ClassificationRule { .. })));

        let info = cisco();
        let subject = MatchSubject {
            hostname: None,
            address: None,
            info: &info,
        };
        assert_eq!(table.first_match(&subject).map(|r| r.name.as_str()), Some("good"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        let it = create_department(&conn, "IT", None).unwrap();
        create_department(&conn, "Research", None).unwrap();
        let switches = create_unit(&conn, "Switches", None).unwrap();

        let mut by_descr = spec("switches", "sys_descr", "C2960", Some("IT"));
        by_descr.unit = Some("Switches".to_string());
        let specs = vec![
            by_descr,
            spec("lab", "subnet", "10.20.0.0/16", Some("Research")),
        ];
        let table = RuleTable::compile(&conn, &specs).unwrap();

        let info = cisco();
        let subject = MatchSubject {
            hostname: Some("sw-lab-1"),
            address: Some(Ipv4Addr::new(10, 20, 1, 1)),
            info: &info,
        };
        let rule = table.first_match(&subject).unwrap();
        assert_eq!((rule.department_id, rule.unit_id), (Some(it), Some(switches)));

        let bare = SystemInfo::default();
        let subject = MatchSubject {
            hostname: None,
            address: Some(Ipv4Addr::new(10, 20, 1, 1)),
            info: &bare,
        };
        assert_eq!(table.first_match(&subject).unwrap().name, "lab");
    }

    #[test]
    fn disabled_rules_never_match() {
        let db = Database::in_memory().unwrap();
        let conn = db.lock().unwrap();
        create_department(&conn, "IT", None).unwrap();

        let mut rule = spec("off", "hostname", ".*", Some("IT"));
        rule.enabled = false;
        let table = RuleTable::compile(&conn, &[rule]).unwrap();

        assert!(table.is_empty());
        assert!(table.rejected().is_empty());
    }
}
